//! Command-line interface
//!
//! Thin wiring over the pipeline: argument parsing, store setup and
//! report printing live here; the work happens in the library modules.

pub mod download;
pub mod events;
pub mod series;
pub mod status;
pub mod update;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::storage::{connect, BatchSizer, EventRepository, FileLedger, QuoteRepository, StoreHandle};

/// FII quote database manager
#[derive(Parser)]
#[command(name = "fii-manager")]
#[command(about = "Ingest B3 COTAHIST archives into a local fund-quote store")]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Ingest staged archives into the store
    Update(update::UpdateArgs),
    /// Download archives from the exchange
    Download(download::DownloadArgs),
    /// Manage corporate actions
    #[command(subcommand)]
    Events(events::EventCommands),
    /// Build an adjusted, rename-merged series
    Series(series::SeriesArgs),
    /// Show store, ledger and cache statistics
    Status(status::StatusArgs),
}

/// Shared wiring: settings plus connected repositories.
pub struct AppContext {
    pub settings: Settings,
    pub store: StoreHandle,
    pub quotes: QuoteRepository,
    pub ledger: FileLedger,
    pub events: EventRepository,
}

impl AppContext {
    /// Load settings and open the store. Configuration or store-open
    /// failures are fatal here, before any command runs.
    pub async fn init() -> anyhow::Result<Self> {
        let settings = Settings::load().map_err(|e| anyhow::anyhow!("configuration error: {}", e))?;
        let store = connect(&settings.database, &settings.cache).await?;

        let quotes = QuoteRepository::new(
            store.clone(),
            BatchSizer::new(settings.database.batch.clone()),
        );
        let ledger = FileLedger::new(store.clone());
        let events = EventRepository::new(store.clone());

        Ok(Self {
            settings,
            store,
            quotes,
            ledger,
            events,
        })
    }
}
