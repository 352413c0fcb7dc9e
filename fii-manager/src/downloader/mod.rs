//! Archive acquisition.
//!
//! The downloader pre-checks availability with a HEAD request (a 404
//! means "not published yet", never a retryable failure), fetches over
//! HTTPS with exponential-backoff retries, verifies the resulting ZIP,
//! and keeps per-host certificate pins on the side.

mod client;
mod pinning;
mod schedule;

pub use client::{ArchiveDownloader, DownloadError, FetchReport};
pub use pinning::{CertificatePinner, PinVerdict};
pub use schedule::DownloadPlanner;
