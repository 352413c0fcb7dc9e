//! Quote repository.
//!
//! Bulk inserts are idempotent (`INSERT OR IGNORE` on the (date, ticker)
//! primary key) and batched so a transaction never grows past the
//! configured payload bound. The read-heavy lookups (latest date, store
//! stats, ticker list) are cache-wrapped; every mutation invalidates
//! those namespaces before returning.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{debug, info};

use fii_common::error::StoreError;
use fii_common::logging::channel;

use crate::parser::QuoteRecord;

use super::db::{BatchSizer, StoreHandle};

const NS_LATEST_DATE: &str = "latest_date";
const NS_STATS: &str = "stats";
const NS_LIST_TICKERS: &str = "list_tickers";

/// Aggregate store statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub rows: i64,
    pub tickers: i64,
    pub date_min: Option<NaiveDate>,
    pub date_max: Option<NaiveDate>,
}

/// Data access for the `quotes` table.
#[derive(Clone)]
pub struct QuoteRepository {
    store: StoreHandle,
    sizer: BatchSizer,
}

impl QuoteRepository {
    pub fn new(store: StoreHandle, sizer: BatchSizer) -> Self {
        Self { store, sizer }
    }

    /// Insert quote rows, ignoring (date, ticker) conflicts.
    ///
    /// Returns the number of rows actually inserted, so re-ingesting an
    /// unchanged archive reports zero. Rows are written in per-batch
    /// transactions sized by payload bytes.
    pub async fn bulk_insert(&self, records: &[QuoteRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let batch_size = self
            .sizer
            .batch_size(records.len(), QuoteRecord::APPROX_BYTES);
        let mut inserted = 0u64;
        let mut written = 0usize;

        for batch in records.chunks(batch_size) {
            let mut tx = self.store.pool.begin().await.map_err(StoreError::from)?;
            for record in batch {
                let result = sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO quotes
                    (date, ticker, open, high, low, close, volume, trade_count, quantity)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(record.trade_date)
                .bind(&record.ticker)
                .bind(record.open)
                .bind(record.high)
                .bind(record.low)
                .bind(record.close)
                .bind(record.volume)
                .bind(record.trade_count)
                .bind(record.quantity)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)?;
                inserted += result.rows_affected();
            }
            tx.commit().await.map_err(StoreError::from)?;

            written += batch.len();
            if written % 20_000 < batch_size && records.len() > 20_000 {
                debug!(target: channel::DB, "progress: {}/{} rows written", written, records.len());
            }
        }

        self.invalidate_lookups();
        info!(
            target: channel::DB,
            "bulk insert: {} of {} rows were new (batch size {})",
            inserted,
            records.len(),
            batch_size
        );
        Ok(inserted)
    }

    /// Delete quotes with `date_from <= date <= date_to`. Returns the
    /// number of rows removed.
    pub async fn delete_range(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM quotes WHERE date BETWEEN ? AND ?")
            .bind(date_from)
            .bind(date_to)
            .execute(&self.store.pool)
            .await
            .map_err(StoreError::from)?;

        self.invalidate_lookups();
        info!(
            target: channel::DB,
            "removed {} quote rows in {}..{}",
            result.rows_affected(),
            date_from,
            date_to
        );
        Ok(result.rows_affected())
    }

    /// Most recent trade date in the store.
    pub async fn latest_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        if let Some(cached) = self
            .store
            .cache
            .get::<Option<NaiveDate>>(NS_LATEST_DATE, "latest")
        {
            return Ok(cached);
        }

        let latest: Option<NaiveDate> = sqlx::query_scalar("SELECT MAX(date) FROM quotes")
            .fetch_one(&self.store.pool)
            .await
            .map_err(StoreError::from)?;

        self.store.cache.put(NS_LATEST_DATE, "latest", &latest);
        Ok(latest)
    }

    /// All distinct tickers, ascending.
    pub async fn list_tickers(&self) -> Result<Vec<String>, StoreError> {
        if let Some(cached) = self.store.cache.get::<Vec<String>>(NS_LIST_TICKERS, "all") {
            return Ok(cached);
        }

        let tickers: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT ticker FROM quotes ORDER BY ticker")
                .fetch_all(&self.store.pool)
                .await
                .map_err(StoreError::from)?;

        self.store.cache.put(NS_LIST_TICKERS, "all", &tickers);
        Ok(tickers)
    }

    /// Row count, distinct tickers and date bounds.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        if let Some(cached) = self.store.cache.get::<StoreStats>(NS_STATS, "all") {
            return Ok(cached);
        }

        let row = sqlx::query(
            "SELECT COUNT(*) AS rows, COUNT(DISTINCT ticker) AS tickers, \
             MIN(date) AS date_min, MAX(date) AS date_max FROM quotes",
        )
        .fetch_one(&self.store.pool)
        .await
        .map_err(StoreError::from)?;

        let stats = StoreStats {
            rows: row.try_get("rows").map_err(StoreError::from)?,
            tickers: row.try_get("tickers").map_err(StoreError::from)?,
            date_min: row.try_get("date_min").map_err(StoreError::from)?,
            date_max: row.try_get("date_max").map_err(StoreError::from)?,
        };

        self.store.cache.put(NS_STATS, "all", &stats);
        Ok(stats)
    }

    /// Quotes for one ticker in `[date_from, date_to]`, ascending by date.
    pub async fn query(
        &self,
        ticker: &str,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<QuoteRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT date, ticker, open, high, low, close, volume, trade_count, quantity
            FROM quotes
            WHERE ticker = ? AND date BETWEEN ? AND ?
            ORDER BY date
            "#,
        )
        .bind(ticker)
        .bind(date_from)
        .bind(date_to)
        .fetch_all(&self.store.pool)
        .await
        .map_err(StoreError::from)?;

        rows.into_iter()
            .map(|row| {
                Ok(QuoteRecord {
                    trade_date: row.try_get("date").map_err(StoreError::from)?,
                    ticker: row.try_get("ticker").map_err(StoreError::from)?,
                    open: row.try_get("open").map_err(StoreError::from)?,
                    high: row.try_get("high").map_err(StoreError::from)?,
                    low: row.try_get("low").map_err(StoreError::from)?,
                    close: row.try_get("close").map_err(StoreError::from)?,
                    volume: row.try_get("volume").map_err(StoreError::from)?,
                    trade_count: row.try_get("trade_count").map_err(StoreError::from)?,
                    quantity: row.try_get("quantity").map_err(StoreError::from)?,
                })
            })
            .collect()
    }

    fn invalidate_lookups(&self) {
        self.store.cache.invalidate(NS_LATEST_DATE);
        self.store.cache.invalidate(NS_STATS);
        self.store.cache.invalidate(NS_LIST_TICKERS);
    }
}

#[cfg(test)]
mod tests {
    use super::super::db::connect_at;
    use super::*;
    use crate::config::BatchSettings;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(d: NaiveDate, ticker: &str, close: f64) -> QuoteRecord {
        QuoteRecord {
            trade_date: d,
            ticker: ticker.to_string(),
            open: close - 0.5,
            high: close + 0.5,
            low: close - 1.0,
            close,
            volume: 1000.0,
            trade_count: 10,
            quantity: 100,
        }
    }

    async fn repo() -> (QuoteRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let handle = connect_at(&dir.path().join("store.db")).await.unwrap();
        (
            QuoteRepository::new(handle, BatchSizer::new(BatchSettings::default())),
            dir,
        )
    }

    #[tokio::test]
    async fn duplicate_inserts_are_ignored() {
        let (repo, _dir) = repo().await;
        let rows = vec![
            record(date(2025, 3, 18), "ABCD11", 10.50),
            record(date(2025, 3, 18), "EFGH11", 20.00),
        ];

        assert_eq!(repo.bulk_insert(&rows).await.unwrap(), 2);
        // Re-running the same insert adds nothing
        assert_eq!(repo.bulk_insert(&rows).await.unwrap(), 0);

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.tickers, 2);
    }

    #[tokio::test]
    async fn delete_range_is_inclusive() {
        let (repo, _dir) = repo().await;
        repo.bulk_insert(&[
            record(date(2025, 3, 17), "ABCD11", 10.0),
            record(date(2025, 3, 18), "ABCD11", 11.0),
            record(date(2025, 3, 19), "ABCD11", 12.0),
        ])
        .await
        .unwrap();

        let deleted = repo
            .delete_range(date(2025, 3, 17), date(2025, 3, 18))
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let remaining = repo
            .query("ABCD11", date(2025, 1, 1), date(2025, 12, 31))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].trade_date, date(2025, 3, 19));
    }

    #[tokio::test]
    async fn query_is_ascending_and_filtered() {
        let (repo, _dir) = repo().await;
        repo.bulk_insert(&[
            record(date(2025, 3, 19), "ABCD11", 12.0),
            record(date(2025, 3, 17), "ABCD11", 10.0),
            record(date(2025, 3, 18), "WXYZ11", 99.0),
        ])
        .await
        .unwrap();

        let rows = repo
            .query("ABCD11", date(2025, 1, 1), date(2025, 12, 31))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].trade_date < rows[1].trade_date);
        assert_eq!(rows[0].close, 10.0);
    }

    #[tokio::test]
    async fn mutations_invalidate_cached_lookups() {
        let (repo, _dir) = repo().await;
        repo.bulk_insert(&[record(date(2025, 3, 17), "ABCD11", 10.0)])
            .await
            .unwrap();

        // Warm the caches
        assert_eq!(repo.latest_date().await.unwrap(), Some(date(2025, 3, 17)));
        assert_eq!(repo.list_tickers().await.unwrap(), vec!["ABCD11"]);

        repo.bulk_insert(&[record(date(2025, 3, 18), "EFGH11", 11.0)])
            .await
            .unwrap();

        // Readers observe the new state, not the cached one
        assert_eq!(repo.latest_date().await.unwrap(), Some(date(2025, 3, 18)));
        assert_eq!(
            repo.list_tickers().await.unwrap(),
            vec!["ABCD11", "EFGH11"]
        );
    }

    #[tokio::test]
    async fn empty_store_reports_empty_stats() {
        let (repo, _dir) = repo().await;
        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.rows, 0);
        assert_eq!(stats.date_min, None);
        assert_eq!(repo.latest_date().await.unwrap(), None);
    }
}
