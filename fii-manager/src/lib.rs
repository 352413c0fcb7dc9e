//! # FII Manager
//!
//! Ingest pipeline for the B3 exchange's historical quote archives
//! (`COTAHIST_*.ZIP`), filtered to real-estate fund tickers.
//!
//! ## Architecture
//!
//! The downloader stages archives into the data directory; the ingestor
//! consumes archives the file ledger has not seen (or whose content hash
//! changed), extracts the embedded fixed-width text, parses it (in
//! parallel chunks for monthly/yearly files) and bulk-inserts quote rows
//! into SQLite. Corporate actions live in their own table and feed the
//! adjustment engine, which rebuilds split-adjusted, rename-merged series
//! on demand. A namespaced in-process cache sits beside the repositories
//! for read-heavy lookups.

pub mod adjust;
pub mod cli;
pub mod config;
pub mod downloader;
pub mod ingest;
pub mod parser;
pub mod storage;

// Re-export commonly used types
pub use adjust::{AdjustedSeries, AdjustmentEngine, TickerSeries};
pub use config::Settings;
pub use downloader::{ArchiveDownloader, DownloadError};
pub use ingest::{IngestReport, Ingestor};
pub use parser::{ArchiveKind, QuoteArchive, QuoteRecord};
pub use storage::{EventRepository, FileLedger, LedgerVerdict, QuoteRepository};
