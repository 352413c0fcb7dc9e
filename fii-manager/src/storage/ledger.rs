//! Processed-archive ledger.
//!
//! Tracks which archives have been ingested and under which content
//! hash. The hash covers the compressed bytes, so the ledger stays valid
//! after the extracted text is deleted. A changed hash means the exchange
//! reissued the file and its date range must be superseded.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::info;

use fii_common::error::StoreError;
use fii_common::logging::channel;

use crate::parser::{ArchiveKind, QuoteArchive};

use super::db::StoreHandle;

const NS_LEDGER: &str = "ledger";

/// What the ledger knows about an archive name + hash pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerVerdict {
    /// Never ingested
    Unseen,
    /// Ingested with the same content hash; skip all parsing
    Unchanged,
    /// Ingested before but the content changed; supersede its range
    Modified,
}

/// One row of the `files_processed` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub archive_name: String,
    pub kind: String,
    pub processed_at: String,
    pub rows_added: i64,
    pub content_hash: String,
}

/// Data access for the `files_processed` table.
#[derive(Clone)]
pub struct FileLedger {
    store: StoreHandle,
}

impl FileLedger {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Compare an archive against the ledger.
    pub async fn verdict(
        &self,
        archive_name: &str,
        current_hash: &str,
    ) -> Result<LedgerVerdict, StoreError> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM files_processed WHERE archive_name = ?")
                .bind(archive_name)
                .fetch_optional(&self.store.pool)
                .await
                .map_err(StoreError::from)?;

        Ok(match stored {
            None => LedgerVerdict::Unseen,
            Some(hash) if hash == current_hash => LedgerVerdict::Unchanged,
            Some(_) => LedgerVerdict::Modified,
        })
    }

    /// Record (or refresh) an archive as processed. `processed_at` is
    /// always rewritten, even when the ingest added zero rows.
    pub async fn record(
        &self,
        archive_name: &str,
        kind: ArchiveKind,
        rows_added: u64,
        content_hash: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO files_processed
            (archive_name, kind, processed_at, rows_added, content_hash)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(archive_name)
        .bind(kind.as_str())
        .bind(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string())
        .bind(rows_added as i64)
        .bind(content_hash)
        .execute(&self.store.pool)
        .await
        .map_err(StoreError::from)?;

        self.store.cache.invalidate(NS_LEDGER);
        info!(target: channel::DB, "ledger: {} recorded ({} rows)", archive_name, rows_added);
        Ok(())
    }

    /// All ledger entries ordered by kind then name.
    pub async fn list(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        if let Some(cached) = self.store.cache.get::<Vec<LedgerEntry>>(NS_LEDGER, "all") {
            return Ok(cached);
        }

        let rows = sqlx::query(
            "SELECT archive_name, kind, processed_at, rows_added, content_hash \
             FROM files_processed ORDER BY kind, archive_name",
        )
        .fetch_all(&self.store.pool)
        .await
        .map_err(StoreError::from)?;

        let entries = rows
            .into_iter()
            .map(|row| {
                Ok(LedgerEntry {
                    archive_name: row.try_get("archive_name").map_err(StoreError::from)?,
                    kind: row.try_get("kind").map_err(StoreError::from)?,
                    processed_at: row.try_get("processed_at").map_err(StoreError::from)?,
                    rows_added: row.try_get("rows_added").map_err(StoreError::from)?,
                    content_hash: row.try_get("content_hash").map_err(StoreError::from)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        self.store.cache.put(NS_LEDGER, "all", &entries);
        Ok(entries)
    }

    /// Drop an archive from the ledger so the next run reprocesses it.
    pub async fn forget(&self, archive_name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM files_processed WHERE archive_name = ?")
            .bind(archive_name)
            .execute(&self.store.pool)
            .await
            .map_err(StoreError::from)?;

        self.store.cache.invalidate(NS_LEDGER);
        Ok(result.rows_affected() > 0)
    }

    /// Most recent trade date covered by a processed daily archive.
    /// Drives the downloader's auto mode.
    pub async fn latest_daily_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        let entries = self.list().await?;
        Ok(entries
            .iter()
            .filter(|e| e.kind == ArchiveKind::Daily.as_str())
            .filter_map(|e| QuoteArchive::from_path(&e.archive_name).ok())
            .map(|a| a.date_to)
            .max())
    }
}

#[cfg(test)]
mod tests {
    use super::super::db::connect_at;
    use super::*;

    async fn ledger() -> (FileLedger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let handle = connect_at(&dir.path().join("store.db")).await.unwrap();
        (FileLedger::new(handle), dir)
    }

    #[tokio::test]
    async fn verdict_lifecycle() {
        let (ledger, _dir) = ledger().await;
        let name = "COTAHIST_D18032025.ZIP";

        assert_eq!(
            ledger.verdict(name, "aaa").await.unwrap(),
            LedgerVerdict::Unseen
        );

        ledger
            .record(name, ArchiveKind::Daily, 1, "aaa")
            .await
            .unwrap();
        assert_eq!(
            ledger.verdict(name, "aaa").await.unwrap(),
            LedgerVerdict::Unchanged
        );

        // Content changed upstream
        assert_eq!(
            ledger.verdict(name, "bbb").await.unwrap(),
            LedgerVerdict::Modified
        );
    }

    #[tokio::test]
    async fn record_is_an_upsert() {
        let (ledger, _dir) = ledger().await;
        let name = "COTAHIST_D18032025.ZIP";

        ledger
            .record(name, ArchiveKind::Daily, 5, "aaa")
            .await
            .unwrap();
        ledger
            .record(name, ArchiveKind::Daily, 0, "bbb")
            .await
            .unwrap();

        let entries = ledger.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content_hash, "bbb");
        assert_eq!(entries[0].rows_added, 0);
    }

    #[tokio::test]
    async fn forget_enables_reprocessing() {
        let (ledger, _dir) = ledger().await;
        let name = "COTAHIST_D18032025.ZIP";

        ledger
            .record(name, ArchiveKind::Daily, 5, "aaa")
            .await
            .unwrap();
        assert!(ledger.forget(name).await.unwrap());
        assert!(!ledger.forget(name).await.unwrap());

        assert_eq!(
            ledger.verdict(name, "aaa").await.unwrap(),
            LedgerVerdict::Unseen
        );
    }

    #[tokio::test]
    async fn latest_daily_date_ignores_other_kinds() {
        let (ledger, _dir) = ledger().await;

        ledger
            .record("COTAHIST_A2024.ZIP", ArchiveKind::Yearly, 100, "y")
            .await
            .unwrap();
        assert_eq!(ledger.latest_daily_date().await.unwrap(), None);

        ledger
            .record("COTAHIST_D17032025.ZIP", ArchiveKind::Daily, 5, "a")
            .await
            .unwrap();
        ledger
            .record("COTAHIST_D18032025.ZIP", ArchiveKind::Daily, 5, "b")
            .await
            .unwrap();

        assert_eq!(
            ledger.latest_daily_date().await.unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 18)
        );
    }
}
