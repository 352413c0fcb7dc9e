//! Download planning against the trading calendar.
//!
//! The exchange only publishes files for days it was open, so every plan
//! is filtered through the calendar first. Auto mode fills the gap
//! between the newest processed daily archive and today.

use chrono::NaiveDate;
use tracing::info;

use fii_common::calendar::TradingCalendar;
use fii_common::error::StoreError;
use fii_common::logging::channel;

use crate::storage::FileLedger;

/// Computes which daily archives are worth requesting.
pub struct DownloadPlanner<'a> {
    calendar: &'a dyn TradingCalendar,
}

impl<'a> DownloadPlanner<'a> {
    pub fn new(calendar: &'a dyn TradingCalendar) -> Self {
        Self { calendar }
    }

    /// A single requested day, or nothing when the exchange was closed.
    pub fn plan_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        if self.calendar.is_trading_day(date) {
            Some(date)
        } else {
            info!(target: channel::DOWNLOAD, "{} is not a trading day, skipping", date);
            None
        }
    }

    /// Trading days in `[from, to]`, inclusive.
    pub fn plan_range(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        self.calendar.trading_days_between(from, to)
    }

    /// Missing trading days strictly after the ledger's newest processed
    /// daily archive, through `today`. With an empty ledger, falls back
    /// to today (or the previous trading day when today is closed).
    pub async fn plan_auto(
        &self,
        ledger: &FileLedger,
        today: NaiveDate,
    ) -> Result<Vec<NaiveDate>, StoreError> {
        let plan = match ledger.latest_daily_date().await? {
            Some(latest) => {
                let from = latest.succ_opt().unwrap_or(latest);
                self.calendar.trading_days_between(from, today)
            }
            None => {
                if self.calendar.is_trading_day(today) {
                    vec![today]
                } else {
                    vec![self.calendar.previous_trading_day(today)]
                }
            }
        };
        info!(target: channel::DOWNLOAD, "auto plan: {} day(s) to request", plan.len());
        Ok(plan)
    }
}
