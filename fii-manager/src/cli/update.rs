//! `update` command: ingest staged archives.

use anyhow::Result;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use crate::ingest::{ArchiveOutcome, IngestReport, Ingestor};

use super::AppContext;

/// Arguments for the update command
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Reprocess archives even when their content hash is unchanged
    #[arg(long)]
    pub force: bool,

    /// Show a progress bar
    #[arg(long, default_value = "true")]
    pub progress: bool,
}

/// Execute the update command. Returns false when the run should exit
/// non-zero (archives attempted, none succeeded).
pub async fn execute(args: UpdateArgs) -> Result<bool> {
    let ctx = AppContext::init().await?;
    let ingestor = Ingestor::new(
        ctx.settings.ingest.clone(),
        ctx.quotes.clone(),
        ctx.ledger.clone(),
    );

    let archives = ingestor.discover(&ctx.settings.downloader.data_dir)?;
    if archives.is_empty() {
        info!("no archives found in {}", ctx.settings.downloader.data_dir.display());
        return Ok(true);
    }
    info!("{} archive(s) staged", archives.len());

    let bar = if args.progress {
        let bar = ProgressBar::new(archives.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        Some(bar)
    } else {
        None
    };

    let mut report = IngestReport::default();
    for archive in &archives {
        if let Some(ref bar) = bar {
            bar.set_message(archive.name.clone());
        }
        match ingestor.process_archive(archive, args.force).await {
            Ok((ArchiveOutcome::Processed, rows, skipped)) => {
                report.processed += 1;
                report.rows_inserted += rows;
                report.lines_skipped += skipped;
            }
            Ok((ArchiveOutcome::SkippedUnchanged, _, _)) => {
                report.skipped_unchanged += 1;
            }
            Err(err) => {
                report.failed += 1;
                error!("{} failed: {}", archive.name, err);
            }
        }
        if let Some(ref bar) = bar {
            bar.inc(1);
        }
    }
    if let Some(bar) = bar {
        bar.finish_with_message("done");
    }

    println!("\nIngest summary:");
    println!("  processed:        {}", report.processed);
    println!("  unchanged (skip): {}", report.skipped_unchanged);
    println!("  failed:           {}", report.failed);
    println!("  rows inserted:    {}", report.rows_inserted);
    println!("  lines skipped:    {}", report.lines_skipped);

    Ok(report.is_success())
}
