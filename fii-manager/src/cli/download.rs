//! `download` command: fetch archives from the exchange.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::Args;
use tracing::{error, info, warn};

use fii_common::calendar::WeekdayCalendar;
use fii_common::error::ErrorClassification;

use crate::downloader::{ArchiveDownloader, DownloadError, DownloadPlanner};
use crate::parser::QuoteArchive;

use super::AppContext;

/// Arguments for the download command
#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Download one daily archive (YYYY-MM-DD)
    #[arg(long, conflicts_with_all = ["from", "auto", "year"])]
    pub date: Option<NaiveDate>,

    /// Start of a daily range (YYYY-MM-DD), inclusive
    #[arg(long, requires = "to", conflicts_with_all = ["auto", "year"])]
    pub from: Option<NaiveDate>,

    /// End of a daily range (YYYY-MM-DD), inclusive
    #[arg(long, requires = "from")]
    pub to: Option<NaiveDate>,

    /// Download every trading day missing since the last processed one
    #[arg(long)]
    pub auto: bool,

    /// Download one yearly archive
    #[arg(long)]
    pub year: Option<i32>,

    /// Re-download files that already exist in the staging directory
    #[arg(long)]
    pub force: bool,
}

/// Execute the download command. Returns false when nothing in the batch
/// succeeded even though something was attempted.
pub async fn execute(args: DownloadArgs) -> Result<bool> {
    let ctx = AppContext::init().await?;
    let calendar = WeekdayCalendar;
    let planner = DownloadPlanner::new(&calendar);

    let mut names: Vec<String> = Vec::new();
    if let Some(year) = args.year {
        names.push(QuoteArchive::yearly_name(year));
    }
    if let Some(date) = args.date {
        if let Some(day) = planner.plan_day(date) {
            names.push(QuoteArchive::daily_name(day));
        }
    }
    if let (Some(from), Some(to)) = (args.from, args.to) {
        names.extend(planner.plan_range(from, to).into_iter().map(QuoteArchive::daily_name));
    }
    if args.auto {
        let today = Utc::now().date_naive();
        names.extend(
            planner
                .plan_auto(&ctx.ledger, today)
                .await?
                .into_iter()
                .map(QuoteArchive::daily_name),
        );
    }

    if names.is_empty() {
        info!("nothing to download");
        return Ok(true);
    }

    let mut downloader = ArchiveDownloader::new(ctx.settings.downloader.clone())?;
    let data_dir = &ctx.settings.downloader.data_dir;
    std::fs::create_dir_all(data_dir)?;

    let mut succeeded = 0usize;
    let mut unavailable = 0usize;
    let mut failed = 0usize;

    for name in &names {
        let destination = data_dir.join(name);
        if destination.exists() && !args.force {
            info!("{} already staged, skipping (use --force to refetch)", name);
            succeeded += 1;
            continue;
        }

        match downloader.fetch(name, &destination).await {
            Ok(report) => {
                info!("{} fetched in {} attempt(s)", name, report.attempts);
                succeeded += 1;
            }
            Err(DownloadError::NotYetPublished(_)) => {
                warn!("{} not yet published, try again later", name);
                unavailable += 1;
            }
            Err(err) => {
                error!(
                    "{} failed ({}): {}",
                    name,
                    if err.is_transient() { "transient" } else { "permanent" },
                    err
                );
                failed += 1;
            }
        }
    }

    println!("\nDownload summary:");
    println!("  fetched or staged: {}", succeeded);
    println!("  not yet published: {}", unavailable);
    println!("  failed:            {}", failed);

    Ok(succeeded > 0 || failed == 0)
}
