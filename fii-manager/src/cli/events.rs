//! `events` commands: corporate-action administration.

use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Subcommand};

use crate::storage::{CorporateAction, EventKind};

use super::AppContext;

/// Corporate-action subcommands
#[derive(Subcommand, Debug)]
pub enum EventCommands {
    /// Import events from a JSON file
    Import(ImportArgs),
    /// Record one event
    Add(AddArgs),
    /// List events, optionally filtered
    List(ListArgs),
    /// Remove one event
    Remove(KeyArgs),
    /// Change the factor of an existing event
    SetFactor(SetFactorArgs),
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// JSON file: [{"ticker", "kind", "effective_date", "factor"}, ...]
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    pub ticker: String,
    /// Effective date (YYYY-MM-DD)
    pub date: NaiveDate,
    /// "split" or "reverse_split"
    pub kind: String,
    pub factor: f64,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Filter by ticker
    #[arg(long)]
    pub ticker: Option<String>,
    /// Filter range start (YYYY-MM-DD)
    #[arg(long, requires = "to")]
    pub from: Option<NaiveDate>,
    /// Filter range end (YYYY-MM-DD)
    #[arg(long, requires = "from")]
    pub to: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    pub ticker: String,
    pub date: NaiveDate,
    pub kind: String,
}

#[derive(Args, Debug)]
pub struct SetFactorArgs {
    pub ticker: String,
    pub date: NaiveDate,
    pub kind: String,
    pub factor: f64,
}

/// Execute an events subcommand.
pub async fn execute(command: EventCommands) -> Result<()> {
    let ctx = AppContext::init().await?;

    match command {
        EventCommands::Import(args) => {
            let report = ctx.events.import(&args.file).await?;
            println!("Imported {} event(s)", report.inserted);
            println!("  duplicates ignored: {}", report.duplicates);
            for conflict in &report.conflicts {
                println!("  CONFLICT (skipped): {}", conflict);
            }
            for invalid in &report.invalid {
                println!("  invalid (skipped):  {}", invalid);
            }
        }
        EventCommands::Add(args) => {
            let kind = EventKind::parse(&args.kind)?;
            ctx.events
                .insert(&CorporateAction::new(&args.ticker, args.date, kind, args.factor))
                .await?;
            println!("Recorded {} {} on {}", args.ticker.to_uppercase(), kind, args.date);
        }
        EventCommands::List(args) => {
            let range = match (args.from, args.to) {
                (Some(from), Some(to)) => Some((from, to)),
                _ => None,
            };
            let actions = ctx.events.list(args.ticker.as_deref(), range).await?;
            if actions.is_empty() {
                println!("No events recorded");
            }
            for action in actions {
                println!(
                    "{}  {:<12} {:<14} factor {}",
                    action.effective_date, action.ticker, action.kind, action.factor
                );
            }
        }
        EventCommands::Remove(args) => {
            let kind = EventKind::parse(&args.kind)?;
            if ctx.events.remove(&args.ticker, args.date, kind).await? {
                println!("Removed");
            } else {
                println!("No matching event");
            }
        }
        EventCommands::SetFactor(args) => {
            let kind = EventKind::parse(&args.kind)?;
            if ctx
                .events
                .update_factor(&args.ticker, args.date, kind, args.factor)
                .await?
            {
                println!("Factor updated");
            } else {
                println!("No matching event");
            }
        }
    }

    Ok(())
}
