// fii-common: Shared foundation for the FII data pipeline
// Used by fii-manager (ingest pipeline + CLI)

pub mod cache;
pub mod calendar;
pub mod error;
pub mod logging;

pub use cache::{CachePolicy, CacheStats, NamespaceStats, QueryCache};
pub use calendar::{TradingCalendar, WeekdayCalendar};
pub use error::{ErrorCategory, ErrorClassification};
