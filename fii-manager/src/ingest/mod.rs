//! Ingest orchestration.
//!
//! Archives are processed sequentially in chronological order; within a
//! monthly or yearly archive, parsing fans out to a bounded worker pool.
//! A failure inside one archive aborts that archive only; the ledger is
//! not touched for it, so the next run sees it again. Partial inserts are
//! harmless because the store deduplicates on (date, ticker).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use fii_common::error::StoreError;
use fii_common::logging::channel;

use crate::config::IngestSettings;
use crate::parser::{self, ArchiveKind, ArchiveNameError, QuoteArchive};
use crate::storage::{FileLedger, LedgerVerdict, QuoteRepository};

/// Failures that abort one archive.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Archive(#[from] ArchiveNameError),

    #[error("extraction failed for {name} after {attempts} attempt(s): {reason}")]
    Extract {
        name: String,
        attempts: u32,
        reason: String,
    },

    #[error("{name} is not a usable archive: {reason}")]
    Integrity { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What happened to one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Parsed and inserted (possibly zero new rows)
    Processed,
    /// Hash unchanged since the last run; parsing skipped entirely
    SkippedUnchanged,
}

/// Aggregate result of one ingest run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub processed: u32,
    pub skipped_unchanged: u32,
    pub failed: u32,
    pub rows_inserted: u64,
    /// Lines that did not yield a record across all parsed archives
    pub lines_skipped: u64,
}

impl IngestReport {
    pub fn attempted(&self) -> u32 {
        self.processed + self.skipped_unchanged + self.failed
    }

    /// The process exits non-zero only when something was attempted and
    /// nothing succeeded.
    pub fn is_success(&self) -> bool {
        self.attempted() == 0 || self.processed + self.skipped_unchanged > 0
    }
}

/// Orchestrates discovery, extraction, parsing and persistence.
pub struct Ingestor {
    settings: IngestSettings,
    quotes: QuoteRepository,
    ledger: FileLedger,
}

impl Ingestor {
    pub fn new(settings: IngestSettings, quotes: QuoteRepository, ledger: FileLedger) -> Self {
        Self {
            settings,
            quotes,
            ledger,
        }
    }

    /// List ingestible archives in `data_dir`, ascending by date range so
    /// partial runs leave a chronological prefix behind.
    pub fn discover(&self, data_dir: &Path) -> Result<Vec<QuoteArchive>, IngestError> {
        let mut archives = Vec::new();
        for entry in std::fs::read_dir(data_dir)? {
            let path = entry?.path();
            let name = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            if !QuoteArchive::is_archive_name(name) || !name.to_uppercase().ends_with(".ZIP") {
                continue;
            }
            match QuoteArchive::from_path(&path) {
                Ok(archive) => archives.push(archive),
                Err(err) => {
                    warn!(target: channel::INGEST, "ignoring {}: {}", name, err)
                }
            }
        }
        archives.sort_by(|a, b| {
            (a.date_from, a.kind, a.name.as_str()).cmp(&(b.date_from, b.kind, b.name.as_str()))
        });
        Ok(archives)
    }

    /// Process a batch of archives. Per-archive failures are logged and
    /// counted; they never abort the batch.
    pub async fn run(&self, archives: &[QuoteArchive], force: bool) -> IngestReport {
        let mut report = IngestReport::default();

        for archive in archives {
            match self.process_archive(archive, force).await {
                Ok((ArchiveOutcome::Processed, rows, skipped)) => {
                    report.processed += 1;
                    report.rows_inserted += rows;
                    report.lines_skipped += skipped;
                }
                Ok((ArchiveOutcome::SkippedUnchanged, _, _)) => {
                    report.skipped_unchanged += 1;
                }
                Err(err) => {
                    report.failed += 1;
                    error!(target: channel::INGEST, "{} failed: {}", archive.name, err);
                }
            }
        }

        info!(
            target: channel::INGEST,
            "ingest finished: {} processed, {} unchanged, {} failed, {} rows inserted, {} lines skipped",
            report.processed,
            report.skipped_unchanged,
            report.failed,
            report.rows_inserted,
            report.lines_skipped
        );
        report
    }

    /// Process one archive end to end.
    pub async fn process_archive(
        &self,
        archive: &QuoteArchive,
        force: bool,
    ) -> Result<(ArchiveOutcome, u64, u64), IngestError> {
        let hash = hash_file(&archive.path)?;
        let verdict = self.ledger.verdict(&archive.name, &hash).await?;

        if verdict == LedgerVerdict::Unchanged && !force {
            // Refresh processed_at; the row count for this run is zero.
            self.ledger
                .record(&archive.name, archive.kind, 0, &hash)
                .await?;
            info!(target: channel::INGEST, "{} unchanged, skipping", archive.name);
            return Ok((ArchiveOutcome::SkippedUnchanged, 0, 0));
        }

        let (text_path, is_temporary) = self.obtain_text(archive).await?;

        let result = self.parse_and_store(archive, verdict, force, &text_path).await;

        // The extracted text is derivable from the ZIP; never keep it.
        if is_temporary {
            if let Err(err) = std::fs::remove_file(&text_path) {
                warn!(target: channel::INGEST, "could not remove {}: {}", text_path.display(), err);
            }
        }

        let (rows, skipped) = result?;
        self.ledger
            .record(&archive.name, archive.kind, rows, &hash)
            .await?;

        Ok((ArchiveOutcome::Processed, rows, skipped))
    }

    async fn parse_and_store(
        &self,
        archive: &QuoteArchive,
        verdict: LedgerVerdict,
        force: bool,
        text_path: &Path,
    ) -> Result<(u64, u64), IngestError> {
        if verdict == LedgerVerdict::Modified || (force && verdict != LedgerVerdict::Unseen) {
            // The source changed upstream: rows from the old version of
            // this archive's range must not survive.
            self.quotes
                .delete_range(archive.date_from, archive.date_to)
                .await?;
        }

        let data = std::fs::read(text_path)?;
        let outcome = match archive.kind {
            ArchiveKind::Daily => parser::parse_lines(&data),
            ArchiveKind::Monthly | ArchiveKind::Yearly => {
                parser::parse_parallel(
                    Arc::new(data),
                    self.settings.chunk_lines,
                    self.settings.effective_workers(),
                )
                .await
            }
        };

        info!(
            target: channel::INGEST,
            "{}: {} fund records, {} lines skipped",
            archive.name,
            outcome.records.len(),
            outcome.skipped
        );

        let inserted = self.quotes.bulk_insert(&outcome.records).await?;
        Ok((inserted, outcome.skipped))
    }

    /// Locate the fixed-width text for an archive: either the file itself
    /// (pre-extracted `.TXT`) or the single ZIP member extracted next to
    /// the archive. Returns the path and whether it is ours to delete.
    async fn obtain_text(&self, archive: &QuoteArchive) -> Result<(PathBuf, bool), IngestError> {
        if archive
            .path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("txt"))
            .unwrap_or(false)
        {
            return Ok((archive.path.clone(), false));
        }

        let target = archive.text_path();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.extract_once(archive, &target) {
                Ok(()) => return Ok((target, true)),
                Err(err @ IngestError::Integrity { .. }) => return Err(err),
                Err(err) if attempt < self.settings.extract_retries => {
                    warn!(
                        target: channel::INGEST,
                        "extraction attempt {}/{} for {} failed: {}",
                        attempt,
                        self.settings.extract_retries,
                        archive.name,
                        err
                    );
                    tokio::time::sleep(Duration::from_secs_f64(
                        self.settings.extract_retry_delay_secs,
                    ))
                    .await;
                }
                Err(err) => {
                    return Err(IngestError::Extract {
                        name: archive.name.clone(),
                        attempts: attempt,
                        reason: err.to_string(),
                    })
                }
            }
        }
    }

    fn extract_once(&self, archive: &QuoteArchive, target: &Path) -> Result<(), IngestError> {
        let file = std::fs::File::open(&archive.path)?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| IngestError::Integrity {
            name: archive.name.clone(),
            reason: format!("not a valid ZIP: {}", e),
        })?;

        if zip.is_empty() {
            return Err(IngestError::Integrity {
                name: archive.name.clone(),
                reason: "ZIP has no members".to_string(),
            });
        }

        // The exchange ships exactly one text file per archive.
        let mut member = zip.by_index(0).map_err(|e| IngestError::Integrity {
            name: archive.name.clone(),
            reason: e.to_string(),
        })?;

        let mut out = std::fs::File::create(target)?;
        std::io::copy(&mut member, &mut out)?;
        Ok(())
    }
}

/// SHA-256 of a file, streamed in blocks, as lowercase hex.
pub fn hash_file(path: &Path) -> Result<String, std::io::Error> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 65_536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        assert_eq!(hash_file(&a).unwrap(), hash_file(&b).unwrap());

        std::fs::write(&b, b"different bytes").unwrap();
        assert_ne!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
    }

    #[test]
    fn report_exit_rule() {
        let mut report = IngestReport::default();
        // Nothing attempted: success
        assert!(report.is_success());

        // Attempted and all failed: failure
        report.failed = 2;
        assert!(!report.is_success());

        // One unchanged skip counts as success
        report.skipped_unchanged = 1;
        assert!(report.is_success());

        let report = IngestReport {
            processed: 1,
            failed: 3,
            ..Default::default()
        };
        assert!(report.is_success());
    }
}
