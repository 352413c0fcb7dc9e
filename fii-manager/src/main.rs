//! FII Manager CLI
//!
//! Commands:
//! - `update`: ingest staged archives into the store
//! - `download`: fetch archives from the exchange
//! - `events`: manage corporate actions
//! - `series`: build adjusted, rename-merged series
//! - `status`: store, ledger and cache statistics
//!
//! # Logging Configuration
//!
//! Configure via environment variables:
//! - `RUST_LOG`: Log filter (e.g., "fii_manager=debug,download=debug")
//! - `LOG_FORMAT`: Output format ("pretty", "compact")
//! - `LOG_TIMESTAMPS`: Timestamp format ("local", "utc", "none")

use anyhow::Result;
use clap::Parser;

use fii_common::logging::{init_logging, LogConfig};
use fii_manager::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::from_env().with_default_level("info,sqlx=warn");
    init_logging(log_config).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let batch_ok = match cli.command {
        Commands::Update(args) => fii_manager::cli::update::execute(args).await?,
        Commands::Download(args) => fii_manager::cli::download::execute(args).await?,
        Commands::Events(cmd) => {
            fii_manager::cli::events::execute(cmd).await?;
            true
        }
        Commands::Series(args) => {
            fii_manager::cli::series::execute(args).await?;
            true
        }
        Commands::Status(args) => {
            fii_manager::cli::status::execute(args).await?;
            true
        }
    };

    if !batch_ok {
        std::process::exit(1);
    }
    Ok(())
}
