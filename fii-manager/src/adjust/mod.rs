//! Corporate-action adjustment engine.
//!
//! Rebuilds a continuous, back-adjusted series for a fund: rename chains
//! are merged into one history labelled by the current symbol, and
//! splits/reverse splits rewrite past prices so the most recent row is
//! unchanged. Quantities and volumes scale inversely to prices.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use fii_common::error::{SerializationError, StoreError, ValidationError};
use fii_common::logging::channel;

use crate::storage::{EventError, EventKind, EventRepository, QuoteRepository};

/// Engine failures.
#[derive(Debug, thiserror::Error)]
pub enum AdjustError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Events(#[from] EventError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ordered rename chain ending in the current symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerSeries {
    symbols: Vec<String>,
}

impl TickerSeries {
    pub fn new(symbols: Vec<String>) -> Result<Self, ValidationError> {
        if symbols.is_empty() {
            return Err(ValidationError::required("symbols"));
        }
        Ok(Self {
            symbols: symbols.into_iter().map(|s| s.to_uppercase()).collect(),
        })
    }

    pub fn single(symbol: &str) -> Self {
        Self {
            symbols: vec![symbol.to_uppercase()],
        }
    }

    /// Historical symbols in order, terminal symbol last.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// The current symbol; the merged series is labelled with it.
    pub fn label(&self) -> &str {
        self.symbols.last().expect("series is never empty")
    }
}

/// One row of an adjusted series.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedQuote {
    pub date: NaiveDate,
    /// Symbol the raw row was stored under (pre-rename symbols appear in
    /// their historical window)
    pub source_ticker: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: i64,
    pub quantity: f64,
    /// Cumulative factor applied to this row's prices; multiplying the
    /// adjusted close by it recovers the raw stored close.
    pub adjustment: f64,
}

/// A merged, back-adjusted series labelled by its terminal symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedSeries {
    pub label: String,
    pub rows: Vec<AdjustedQuote>,
}

/// Shape of the fund-list file: plain strings are single-symbol series,
/// arrays are rename chains with the current symbol last.
#[derive(Debug, Deserialize)]
struct FundList {
    funds: Vec<FundEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FundEntry {
    Single(String),
    Chain(Vec<String>),
}

/// Load series specs from a fund-list JSON file.
pub fn load_fund_list(path: &Path) -> Result<Vec<TickerSeries>, AdjustError> {
    let text = std::fs::read_to_string(path)?;
    let list: FundList = serde_json::from_str(&text).map_err(SerializationError::from)?;

    let mut series = Vec::with_capacity(list.funds.len());
    for entry in list.funds {
        let symbols = match entry {
            FundEntry::Single(s) => vec![s],
            FundEntry::Chain(chain) => chain,
        };
        series.push(TickerSeries::new(symbols)?);
    }
    Ok(series)
}

// Query bounds wide enough for any exchange history.
const EPOCH_FROM: (i32, u32, u32) = (1980, 1, 1);
const EPOCH_TO: (i32, u32, u32) = (2999, 12, 31);

/// Builds adjusted series from the quote and event stores.
pub struct AdjustmentEngine {
    quotes: QuoteRepository,
    events: EventRepository,
}

impl AdjustmentEngine {
    pub fn new(quotes: QuoteRepository, events: EventRepository) -> Self {
        Self { quotes, events }
    }

    /// Build the merged, back-adjusted series for one rename chain.
    pub async fn build(&self, series: &TickerSeries) -> Result<AdjustedSeries, AdjustError> {
        let from = NaiveDate::from_ymd_opt(EPOCH_FROM.0, EPOCH_FROM.1, EPOCH_FROM.2).unwrap();
        let to = NaiveDate::from_ymd_opt(EPOCH_TO.0, EPOCH_TO.1, EPOCH_TO.2).unwrap();

        // Merge histories; symbols later in the chain win date collisions.
        let mut merged: BTreeMap<NaiveDate, AdjustedQuote> = BTreeMap::new();
        for symbol in series.symbols() {
            for record in self.quotes.query(symbol, from, to).await? {
                merged.insert(
                    record.trade_date,
                    AdjustedQuote {
                        date: record.trade_date,
                        source_ticker: record.ticker,
                        open: record.open,
                        high: record.high,
                        low: record.low,
                        close: record.close,
                        volume: record.volume,
                        trade_count: record.trade_count,
                        quantity: record.quantity as f64,
                        adjustment: 1.0,
                    },
                );
            }
        }

        let events = self.events.for_tickers(series.symbols()).await?;
        let mut rows: Vec<AdjustedQuote> = merged.into_values().collect();
        back_adjust(&mut rows, &events);

        info!(
            target: channel::INGEST,
            "built series {}: {} rows, {} corporate action(s)",
            series.label(),
            rows.len(),
            events.len()
        );

        Ok(AdjustedSeries {
            label: series.label().to_string(),
            rows,
        })
    }
}

/// Apply back-adjustment in place. `rows` must be ascending by date and
/// `events` ascending by effective date.
///
/// Walking backward from the newest row, the cumulative factor F starts
/// at 1 and folds in each event as its effective date is crossed: a split
/// with factor k multiplies F by k, a reverse split divides. Rows dated
/// on or after an effective date are untouched by that event; rows
/// strictly before it have prices divided by F and volume/quantity
/// multiplied by F.
fn back_adjust(rows: &mut [AdjustedQuote], events: &[crate::storage::CorporateAction]) {
    let mut factor = 1.0f64;
    let mut remaining = events.len();

    for row in rows.iter_mut().rev() {
        while remaining > 0 && events[remaining - 1].effective_date > row.date {
            let event = &events[remaining - 1];
            match event.kind {
                EventKind::Split => factor *= event.factor,
                EventKind::ReverseSplit => factor /= event.factor,
            }
            remaining -= 1;
        }

        if factor != 1.0 {
            row.open /= factor;
            row.high /= factor;
            row.low /= factor;
            row.close /= factor;
            row.volume *= factor;
            row.quantity *= factor;
            row.adjustment = factor;
        }
    }
}
