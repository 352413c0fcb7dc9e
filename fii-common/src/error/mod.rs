//! Consolidated error handling for the FII data pipeline.
//!
//! This module provides:
//! - Common error types reused across the workspace
//! - Error classification for retry logic
//!
//! Errors self-describe whether they are worth retrying; the downloader
//! and the store layer both lean on [`ErrorClassification`] instead of
//! matching on concrete variants.

mod common;
mod traits;

pub use common::*;
pub use traits::*;
