//! Pool construction, schema bootstrap and batch sizing.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::info;

use fii_common::cache::{CachePolicy, QueryCache};
use fii_common::error::StoreError;
use fii_common::logging::channel;

use crate::config::{BatchSettings, CacheSettings, DatabaseSettings};

/// Shared store state handed to each repository: the pool plus the
/// process-wide query cache.
#[derive(Clone)]
pub struct StoreHandle {
    pub pool: SqlitePool,
    pub cache: Arc<QueryCache>,
}

/// Open (creating if missing) the SQLite store and bootstrap the schema.
///
/// Engine tuning: WAL journalling so exports can read while a load is in
/// flight, `synchronous = NORMAL`, and a busy timeout from settings so
/// transient contention waits instead of failing.
pub async fn connect(
    settings: &DatabaseSettings,
    cache_settings: &CacheSettings,
) -> Result<StoreHandle, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(&settings.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(settings.busy_timeout_secs));

    let pool = SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .connect_with(options)
        .await
        .map_err(StoreError::from)?;

    init_schema(&pool).await?;

    info!(
        target: channel::DB,
        "store ready at {} (busy timeout {}s)",
        settings.path.display(),
        settings.busy_timeout_secs
    );

    let cache = Arc::new(QueryCache::new(CachePolicy::new(
        cache_settings.default_ttl_secs,
        cache_settings.max_entries,
    )));

    Ok(StoreHandle { pool, cache })
}

/// Open a store at an explicit path with default tuning. Test helper and
/// administrative-tool entry point.
pub async fn connect_at(path: &Path) -> Result<StoreHandle, StoreError> {
    let settings = DatabaseSettings {
        path: path.to_path_buf(),
        ..DatabaseSettings::default()
    };
    connect(&settings, &CacheSettings::default()).await
}

async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quotes (
            date        TEXT NOT NULL,
            ticker      TEXT NOT NULL,
            open        REAL,
            high        REAL,
            low         REAL,
            close       REAL,
            volume      REAL,
            trade_count INTEGER,
            quantity    INTEGER,
            PRIMARY KEY (date, ticker)
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_quotes_date ON quotes(date)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_quotes_ticker ON quotes(ticker)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files_processed (
            archive_name TEXT PRIMARY KEY,
            kind         TEXT,
            processed_at TEXT,
            rows_added   INTEGER,
            content_hash TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS corporate_actions (
            ticker         TEXT NOT NULL,
            effective_date TEXT NOT NULL,
            kind           TEXT NOT NULL CHECK(kind IN ('split','reverse_split')),
            factor         REAL NOT NULL CHECK(factor > 0),
            recorded_at    TEXT,
            PRIMARY KEY (ticker, effective_date, kind)
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_actions_ticker ON corporate_actions(ticker)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Picks batch row counts for bulk inserts from the approximate payload
/// size, so one transaction never carries more than `max_bytes`.
#[derive(Debug, Clone)]
pub struct BatchSizer {
    settings: BatchSettings,
}

impl BatchSizer {
    pub fn new(settings: BatchSettings) -> Self {
        Self { settings }
    }

    /// Batch size for `total_rows` records of roughly `row_bytes` each.
    pub fn batch_size(&self, total_rows: usize, row_bytes: usize) -> usize {
        let s = &self.settings;
        if total_rows <= s.small {
            return s.small;
        }
        if row_bytes > 0 {
            let per_batch = s.max_bytes / row_bytes;
            return per_batch.clamp(1, s.large);
        }
        if total_rows <= s.medium * 10 {
            s.medium
        } else {
            s.large
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_loads_use_small_batches() {
        let sizer = BatchSizer::new(BatchSettings::default());
        assert_eq!(sizer.batch_size(500, 100), 1_000);
    }

    #[test]
    fn byte_estimate_caps_batch() {
        let sizer = BatchSizer::new(BatchSettings::default());
        // 1 MiB / 100 bytes = 10485, clamped to large (10_000)
        assert_eq!(sizer.batch_size(50_000, 100), 10_000);
        // Big rows shrink the batch
        assert_eq!(sizer.batch_size(50_000, 524_288), 2);
    }

    #[test]
    fn unknown_row_size_falls_back_to_tiers() {
        let sizer = BatchSizer::new(BatchSettings::default());
        assert_eq!(sizer.batch_size(20_000, 0), 5_000);
        assert_eq!(sizer.batch_size(200_000, 0), 10_000);
    }

    #[tokio::test]
    async fn schema_bootstraps_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        let handle = connect_at(&path).await.unwrap();
        // Second connect against the same file must not fail
        let handle2 = connect_at(&path).await.unwrap();

        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quotes")
            .fetch_one(&handle.pool)
            .await
            .unwrap();
        assert_eq!(n, 0);

        handle.pool.close().await;
        handle2.pool.close().await;
    }
}
