//! `series` command: build adjusted series and write them as CSV.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::adjust::{load_fund_list, AdjustedSeries, AdjustmentEngine, TickerSeries};

use super::AppContext;

/// Arguments for the series command
#[derive(Args, Debug)]
pub struct SeriesArgs {
    /// Rename chain, oldest first, current symbol last (e.g. OLD11,NEW11)
    #[arg(long, value_delimiter = ',', conflicts_with = "funds")]
    pub chain: Option<Vec<String>>,

    /// Fund-list JSON file ({"funds": ["AAA11", ["OLD11","NEW11"]]})
    #[arg(long)]
    pub funds: Option<PathBuf>,

    /// Write CSV files into this directory instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Execute the series command.
pub async fn execute(args: SeriesArgs) -> Result<()> {
    let ctx = AppContext::init().await?;
    let engine = AdjustmentEngine::new(ctx.quotes.clone(), ctx.events.clone());

    let specs: Vec<TickerSeries> = if let Some(path) = args.funds {
        load_fund_list(&path)?
    } else if let Some(chain) = args.chain {
        vec![TickerSeries::new(chain)?]
    } else {
        anyhow::bail!("pass --chain or --funds");
    };

    if let Some(ref dir) = args.output {
        std::fs::create_dir_all(dir)?;
    }

    for spec in &specs {
        let series = engine.build(spec).await?;
        match args.output {
            Some(ref dir) => {
                let path = dir.join(format!("{}.csv", series.label));
                let mut file = std::fs::File::create(&path)?;
                write_csv(&mut file, &series)?;
                println!("{}: {} rows -> {}", series.label, series.rows.len(), path.display());
            }
            None => {
                write_csv(&mut std::io::stdout().lock(), &series)?;
            }
        }
    }

    Ok(())
}

fn write_csv(out: &mut impl Write, series: &AdjustedSeries) -> std::io::Result<()> {
    writeln!(
        out,
        "date,ticker,open,high,low,close,volume,trade_count,quantity,adjustment"
    )?;
    for row in &series.rows {
        writeln!(
            out,
            "{},{},{:.6},{:.6},{:.6},{:.6},{:.2},{},{:.2},{}",
            row.date,
            series.label,
            row.open,
            row.high,
            row.low,
            row.close,
            row.volume,
            row.trade_count,
            row.quantity,
            row.adjustment
        )?;
    }
    Ok(())
}
