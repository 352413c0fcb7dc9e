//! Trading-calendar interface.
//!
//! The pipeline only asks two questions of a calendar: is a given day a
//! trading day, and which trading days fall in a range. Exchange-accurate
//! holiday calendars live outside this workspace; [`WeekdayCalendar`] is
//! the built-in approximation used by default and in tests.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Business-day queries used by the downloader and the scheduler.
pub trait TradingCalendar: Send + Sync {
    /// True when the exchange is open on `date`.
    fn is_trading_day(&self, date: NaiveDate) -> bool;

    /// Trading days in `[from, to]`, ascending. Empty when `from > to`.
    fn trading_days_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut current = from;
        while current <= to {
            if self.is_trading_day(current) {
                days.push(current);
            }
            current += Duration::days(1);
        }
        days
    }

    /// Most recent trading day strictly before `date`.
    fn previous_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut current = date - Duration::days(1);
        while !self.is_trading_day(current) {
            current -= Duration::days(1);
        }
        current
    }
}

/// Monday-to-Friday calendar. Ignores exchange holidays.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeekdayCalendar;

impl TradingCalendar for WeekdayCalendar {
    fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }
}
