//! `status` command: store, ledger and cache statistics.

use anyhow::Result;
use clap::Args;

use super::AppContext;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also list every processed archive
    #[arg(long)]
    pub ledger: bool,
}

/// Execute the status command.
pub async fn execute(args: StatusArgs) -> Result<()> {
    let ctx = AppContext::init().await?;

    let stats = ctx.quotes.stats().await?;
    println!("Store: {}", ctx.settings.database.path.display());
    println!("  quote rows:   {}", stats.rows);
    println!("  fund tickers: {}", stats.tickers);
    match (stats.date_min, stats.date_max) {
        (Some(min), Some(max)) => println!("  date range:   {} to {}", min, max),
        _ => println!("  date range:   (empty)"),
    }

    let entries = ctx.ledger.list().await?;
    println!("Ledger: {} archive(s) processed", entries.len());
    if args.ledger {
        for entry in &entries {
            println!(
                "  {:<24} {:<8} {:>9} rows  {}  {}",
                entry.archive_name,
                entry.kind,
                entry.rows_added,
                entry.processed_at,
                &entry.content_hash[..entry.content_hash.len().min(12)]
            );
        }
    }

    let cache = ctx.store.cache.stats();
    println!(
        "Cache: {} entr{} across {} namespace(s), hit ratio {:.1}%",
        cache.entries(),
        if cache.entries() == 1 { "y" } else { "ies" },
        cache.namespaces.len(),
        cache.hit_ratio()
    );

    Ok(())
}
