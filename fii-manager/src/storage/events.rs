//! Corporate-action repository.
//!
//! Administrative surface, not part of the ingest path. Validates every
//! row (factor > 0, known kind, parseable date, uppercased ticker) and
//! supports bulk import from a JSON file where exact duplicates are
//! ignored and conflicting duplicates are reported and skipped.

use std::fmt;
use std::path::Path;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{info, warn};

use fii_common::error::{SerializationError, StoreError, ValidationError};
use fii_common::logging::channel;

use super::db::StoreHandle;

const NS_EVENTS: &str = "events";

/// Corporate-action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Split,
    ReverseSplit,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Split => "split",
            EventKind::ReverseSplit => "reverse_split",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "split" => Ok(EventKind::Split),
            "reverse_split" => Ok(EventKind::ReverseSplit),
            other => Err(ValidationError::invalid_format(
                "kind",
                format!("'{}' is not 'split' or 'reverse_split'", other),
            )),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One corporate action. (ticker, effective_date, kind) is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateAction {
    pub ticker: String,
    pub effective_date: NaiveDate,
    pub kind: EventKind,
    pub factor: f64,
    pub recorded_at: Option<String>,
}

impl CorporateAction {
    pub fn new(ticker: &str, effective_date: NaiveDate, kind: EventKind, factor: f64) -> Self {
        Self {
            ticker: ticker.to_uppercase(),
            effective_date,
            kind,
            factor,
            recorded_at: None,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.ticker.trim().is_empty() {
            return Err(ValidationError::required("ticker"));
        }
        if !(self.factor > 0.0 && self.factor.is_finite()) {
            return Err(ValidationError::out_of_range(
                "factor",
                self.factor,
                "> 0",
            ));
        }
        Ok(())
    }
}

/// Errors from the event repository: per-row validation or the store.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a bulk import.
#[derive(Debug, Default, PartialEq)]
pub struct EventImportReport {
    pub inserted: u64,
    /// Same key, same factor: already known
    pub duplicates: u64,
    /// Same key, different factor: reported and skipped
    pub conflicts: Vec<String>,
    /// Failed validation: reported and skipped
    pub invalid: Vec<String>,
}

/// Shape of one row in the import file. Unknown fields are rejected.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImportRow {
    ticker: String,
    kind: String,
    effective_date: String,
    factor: f64,
}

/// Data access for the `corporate_actions` table.
#[derive(Clone)]
pub struct EventRepository {
    store: StoreHandle,
}

impl EventRepository {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Insert or replace one corporate action.
    pub async fn insert(&self, action: &CorporateAction) -> Result<(), EventError> {
        action.validate()?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO corporate_actions
            (ticker, effective_date, kind, factor, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(action.ticker.to_uppercase())
        .bind(action.effective_date)
        .bind(action.kind.as_str())
        .bind(action.factor)
        .bind(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string())
        .execute(&self.store.pool)
        .await
        .map_err(StoreError::from)?;

        self.store.cache.invalidate(NS_EVENTS);
        info!(
            target: channel::DB,
            "event recorded: {} {} on {} (factor {})",
            action.ticker,
            action.kind,
            action.effective_date,
            action.factor
        );
        Ok(())
    }

    /// List actions, optionally filtered by ticker and/or date range.
    /// Ordered by date then ticker.
    pub async fn list(
        &self,
        ticker: Option<&str>,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<CorporateAction>, EventError> {
        let cache_key = format!(
            "{}:{}",
            ticker.map(|t| t.to_uppercase()).unwrap_or_default(),
            range
                .map(|(a, b)| format!("{}..{}", a, b))
                .unwrap_or_default()
        );
        if let Some(cached) = self
            .store
            .cache
            .get::<Vec<CorporateAction>>(NS_EVENTS, &cache_key)
        {
            return Ok(cached);
        }

        let mut sql = String::from(
            "SELECT ticker, effective_date, kind, factor, recorded_at \
             FROM corporate_actions WHERE 1=1",
        );
        if ticker.is_some() {
            sql.push_str(" AND ticker = ?");
        }
        if range.is_some() {
            sql.push_str(" AND effective_date BETWEEN ? AND ?");
        }
        sql.push_str(" ORDER BY effective_date, ticker");

        let mut query = sqlx::query(&sql);
        if let Some(t) = ticker {
            query = query.bind(t.to_uppercase());
        }
        if let Some((from, to)) = range {
            query = query.bind(from).bind(to);
        }

        let rows = query
            .fetch_all(&self.store.pool)
            .await
            .map_err(StoreError::from)?;

        let actions = rows
            .into_iter()
            .map(|row| {
                let kind: String = row.try_get("kind").map_err(StoreError::from)?;
                Ok(CorporateAction {
                    ticker: row.try_get("ticker").map_err(StoreError::from)?,
                    effective_date: row.try_get("effective_date").map_err(StoreError::from)?,
                    kind: EventKind::parse(&kind)?,
                    factor: row.try_get("factor").map_err(StoreError::from)?,
                    recorded_at: row.try_get("recorded_at").map_err(StoreError::from)?,
                })
            })
            .collect::<Result<Vec<_>, EventError>>()?;

        self.store.cache.put(NS_EVENTS, &cache_key, &actions);
        Ok(actions)
    }

    /// Actions for any of the given tickers, ordered by date. Feeds the
    /// adjustment engine.
    pub async fn for_tickers(&self, tickers: &[String]) -> Result<Vec<CorporateAction>, EventError> {
        let mut actions = Vec::new();
        for ticker in tickers {
            actions.extend(self.list(Some(ticker), None).await?);
        }
        actions.sort_by(|a, b| {
            a.effective_date
                .cmp(&b.effective_date)
                .then_with(|| a.ticker.cmp(&b.ticker))
        });
        Ok(actions)
    }

    /// Remove one action. Returns false when no row matched.
    pub async fn remove(
        &self,
        ticker: &str,
        effective_date: NaiveDate,
        kind: EventKind,
    ) -> Result<bool, EventError> {
        let result = sqlx::query(
            "DELETE FROM corporate_actions WHERE ticker = ? AND effective_date = ? AND kind = ?",
        )
        .bind(ticker.to_uppercase())
        .bind(effective_date)
        .bind(kind.as_str())
        .execute(&self.store.pool)
        .await
        .map_err(StoreError::from)?;

        self.store.cache.invalidate(NS_EVENTS);
        Ok(result.rows_affected() > 0)
    }

    /// Update the factor of an existing action.
    pub async fn update_factor(
        &self,
        ticker: &str,
        effective_date: NaiveDate,
        kind: EventKind,
        factor: f64,
    ) -> Result<bool, EventError> {
        if !(factor > 0.0 && factor.is_finite()) {
            return Err(ValidationError::out_of_range("factor", factor, "> 0").into());
        }

        let result = sqlx::query(
            "UPDATE corporate_actions SET factor = ?, recorded_at = ? \
             WHERE ticker = ? AND effective_date = ? AND kind = ?",
        )
        .bind(factor)
        .bind(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string())
        .bind(ticker.to_uppercase())
        .bind(effective_date)
        .bind(kind.as_str())
        .execute(&self.store.pool)
        .await
        .map_err(StoreError::from)?;

        self.store.cache.invalidate(NS_EVENTS);
        Ok(result.rows_affected() > 0)
    }

    /// Import a JSON array of `{ticker, kind, effective_date, factor}`.
    ///
    /// Validation failures and factor conflicts skip the row and continue;
    /// only an unreadable file or a store failure aborts the import.
    pub async fn import(&self, path: &Path) -> Result<EventImportReport, EventError> {
        let text = std::fs::read_to_string(path)?;
        let rows: Vec<ImportRow> =
            serde_json::from_str(&text).map_err(SerializationError::from)?;

        let mut report = EventImportReport::default();

        for row in rows {
            let action = match parse_import_row(&row) {
                Ok(action) => action,
                Err(err) => {
                    warn!(target: channel::DB, "event import: skipping row for '{}': {}", row.ticker, err);
                    report.invalid.push(format!("{}: {}", row.ticker, err));
                    continue;
                }
            };

            match self
                .existing_factor(&action.ticker, action.effective_date, action.kind)
                .await?
            {
                Some(factor) if (factor - action.factor).abs() < f64::EPSILON => {
                    report.duplicates += 1;
                }
                Some(factor) => {
                    let msg = format!(
                        "{} {} on {}: file says {}, store has {}",
                        action.ticker, action.kind, action.effective_date, action.factor, factor
                    );
                    warn!(target: channel::DB, "event import conflict: {}", msg);
                    report.conflicts.push(msg);
                }
                None => {
                    self.insert(&action).await?;
                    report.inserted += 1;
                }
            }
        }

        self.store.cache.invalidate(NS_EVENTS);
        info!(
            target: channel::DB,
            "event import: {} inserted, {} duplicates, {} conflicts, {} invalid",
            report.inserted,
            report.duplicates,
            report.conflicts.len(),
            report.invalid.len()
        );
        Ok(report)
    }

    async fn existing_factor(
        &self,
        ticker: &str,
        effective_date: NaiveDate,
        kind: EventKind,
    ) -> Result<Option<f64>, EventError> {
        let factor: Option<f64> = sqlx::query_scalar(
            "SELECT factor FROM corporate_actions \
             WHERE ticker = ? AND effective_date = ? AND kind = ?",
        )
        .bind(ticker)
        .bind(effective_date)
        .bind(kind.as_str())
        .fetch_optional(&self.store.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(factor)
    }
}

fn parse_import_row(row: &ImportRow) -> Result<CorporateAction, ValidationError> {
    let kind = EventKind::parse(&row.kind)?;
    let effective_date = NaiveDate::parse_from_str(&row.effective_date, "%Y-%m-%d")
        .map_err(|e| ValidationError::invalid_format("effective_date", e.to_string()))?;
    let action = CorporateAction::new(&row.ticker, effective_date, kind, row.factor);
    action.validate()?;
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::super::db::connect_at;
    use super::*;
    use std::io::Write;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn repo() -> (EventRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let handle = connect_at(&dir.path().join("store.db")).await.unwrap();
        (EventRepository::new(handle), dir)
    }

    #[tokio::test]
    async fn insert_uppercases_ticker() {
        let (repo, _dir) = repo().await;
        repo.insert(&CorporateAction::new(
            "xyz11",
            date(2022, 8, 30),
            EventKind::Split,
            10.0,
        ))
        .await
        .unwrap();

        let actions = repo.list(Some("XYZ11"), None).await.unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].ticker, "XYZ11");
        assert_eq!(actions[0].factor, 10.0);
    }

    #[tokio::test]
    async fn invalid_factor_is_rejected() {
        let (repo, _dir) = repo().await;
        let bad = CorporateAction::new("XYZ11", date(2022, 8, 30), EventKind::Split, 0.0);
        assert!(matches!(
            repo.insert(&bad).await,
            Err(EventError::Validation(_))
        ));

        let bad = CorporateAction::new("XYZ11", date(2022, 8, 30), EventKind::Split, -3.0);
        assert!(repo.insert(&bad).await.is_err());
    }

    #[tokio::test]
    async fn list_filters_by_ticker_and_range() {
        let (repo, _dir) = repo().await;
        repo.insert(&CorporateAction::new(
            "AAAA11",
            date(2022, 1, 10),
            EventKind::Split,
            2.0,
        ))
        .await
        .unwrap();
        repo.insert(&CorporateAction::new(
            "BBBB11",
            date(2023, 5, 20),
            EventKind::ReverseSplit,
            4.0,
        ))
        .await
        .unwrap();

        let all = repo.list(None, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let only_a = repo.list(Some("AAAA11"), None).await.unwrap();
        assert_eq!(only_a.len(), 1);

        let in_2023 = repo
            .list(None, Some((date(2023, 1, 1), date(2023, 12, 31))))
            .await
            .unwrap();
        assert_eq!(in_2023.len(), 1);
        assert_eq!(in_2023[0].ticker, "BBBB11");
    }

    #[tokio::test]
    async fn remove_and_update_factor() {
        let (repo, _dir) = repo().await;
        repo.insert(&CorporateAction::new(
            "AAAA11",
            date(2022, 1, 10),
            EventKind::Split,
            2.0,
        ))
        .await
        .unwrap();

        assert!(repo
            .update_factor("AAAA11", date(2022, 1, 10), EventKind::Split, 3.0)
            .await
            .unwrap());
        let actions = repo.list(Some("AAAA11"), None).await.unwrap();
        assert_eq!(actions[0].factor, 3.0);

        assert!(repo
            .remove("AAAA11", date(2022, 1, 10), EventKind::Split)
            .await
            .unwrap());
        assert!(repo.list(Some("AAAA11"), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn import_applies_duplicate_and_conflict_rules() {
        let (repo, dir) = repo().await;

        // Pre-existing event with factor 10
        repo.insert(&CorporateAction::new(
            "XYZ11",
            date(2022, 8, 30),
            EventKind::Split,
            10.0,
        ))
        .await
        .unwrap();

        let file = dir.path().join("events.json");
        let mut f = std::fs::File::create(&file).unwrap();
        write!(
            f,
            r#"[
                {{"ticker": "XYZ11", "kind": "split", "effective_date": "2022-08-30", "factor": 10}},
                {{"ticker": "XYZ11", "kind": "split", "effective_date": "2022-08-30", "factor": 12}},
                {{"ticker": "NEW11", "kind": "reverse_split", "effective_date": "2023-01-02", "factor": 8}},
                {{"ticker": "BAD11", "kind": "merger", "effective_date": "2023-01-02", "factor": 2}},
                {{"ticker": "BAD11", "kind": "split", "effective_date": "01/02/2023", "factor": 2}}
            ]"#
        )
        .unwrap();

        let report = repo.import(&file).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.invalid.len(), 2);

        // The conflicting factor did not overwrite the stored one
        let actions = repo.list(Some("XYZ11"), None).await.unwrap();
        assert_eq!(actions[0].factor, 10.0);
    }

    #[tokio::test]
    async fn import_rejects_unknown_fields() {
        let (repo, dir) = repo().await;
        let file = dir.path().join("events.json");
        std::fs::write(
            &file,
            r#"[{"ticker": "XYZ11", "kind": "split", "effective_date": "2022-08-30", "factor": 10, "comment": "?"}]"#,
        )
        .unwrap();

        assert!(matches!(
            repo.import(&file).await,
            Err(EventError::Serialization(_))
        ));
    }
}
