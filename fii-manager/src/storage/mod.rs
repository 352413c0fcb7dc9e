//! SQLite persistence: quotes, file ledger, corporate actions.
//!
//! Each repository owns its queries and invalidates its cache namespaces
//! inside the same call that mutates the table. The engine is tuned for
//! long bulk loads with concurrent readers (WAL journal, NORMAL
//! synchronous, multi-second busy timeout).

mod db;
mod events;
mod ledger;
mod quotes;

pub use db::{connect, connect_at, BatchSizer, StoreHandle};
pub use events::{CorporateAction, EventError, EventImportReport, EventKind, EventRepository};
pub use ledger::{FileLedger, LedgerEntry, LedgerVerdict};
pub use quotes::{QuoteRepository, StoreStats};
