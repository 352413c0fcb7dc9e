//! COTAHIST archive parsing.
//!
//! Archives are classified from their filename, the embedded fixed-width
//! text is decoded line by line, and large files are parsed in parallel
//! chunks.

mod archive;
mod chunk;
mod line;

pub use archive::{ArchiveKind, ArchiveNameError, QuoteArchive};
pub use chunk::{parse_lines, parse_parallel, ParseOutcome};
pub use line::{parse_line, QuoteRecord, RECORD_MIN_LEN};
