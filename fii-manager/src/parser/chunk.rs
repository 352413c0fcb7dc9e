//! Chunked parallel parsing for large archives.
//!
//! Monthly and yearly files run to millions of lines; the extracted text
//! is split into line-aligned chunks which are parsed on blocking worker
//! tasks, bounded by a semaphore sized to the worker count. Workers share
//! nothing and return their record vectors; ordering across chunks is
//! irrelevant because the store deduplicates on (date, ticker).

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use fii_common::logging::channel;

use super::line::{parse_line, QuoteRecord};

/// Result of parsing a stretch of text.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub records: Vec<QuoteRecord>,
    /// Lines that did not yield a record: wrong record type, wrong BDI
    /// class, or malformed payload. Blank lines are not counted.
    pub skipped: u64,
}

impl ParseOutcome {
    fn merge(&mut self, other: ParseOutcome) {
        self.records.extend(other.records);
        self.skipped += other.skipped;
    }
}

/// Parse a byte buffer single-threaded.
pub fn parse_lines(data: &[u8]) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    for line in data.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(record) => outcome.records.push(record),
            None => outcome.skipped += 1,
        }
    }
    outcome
}

/// Split `data` into line-aligned chunks of at most `chunk_lines` lines.
///
/// Returned slices cover the buffer exactly; no line is ever split across
/// two chunks.
fn chunk_boundaries(data: &[u8], chunk_lines: usize) -> Vec<(usize, usize)> {
    let chunk_lines = chunk_lines.max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut lines = 0usize;

    for (i, b) in data.iter().enumerate() {
        if *b == b'\n' {
            lines += 1;
            if lines == chunk_lines {
                chunks.push((start, i + 1));
                start = i + 1;
                lines = 0;
            }
        }
    }
    if start < data.len() {
        chunks.push((start, data.len()));
    }
    chunks
}

/// Parse a buffer on `workers` parallel blocking tasks.
///
/// The buffer is shared (`Arc`) and chunks index into it, so fan-out
/// costs no copies. Panicking or cancelled workers lose their chunk and
/// are logged; the remaining chunks still land, and a later re-run fills
/// the gap thanks to idempotent inserts.
pub async fn parse_parallel(data: Arc<Vec<u8>>, chunk_lines: usize, workers: usize) -> ParseOutcome {
    let chunks = chunk_boundaries(&data, chunk_lines);
    if chunks.len() <= 1 {
        return parse_lines(&data);
    }

    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();

    for (start, end) in chunks {
        let data = data.clone();
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            tokio::task::spawn_blocking(move || parse_lines(&data[start..end])).await
        });
    }

    let mut outcome = ParseOutcome::default();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(chunk_outcome)) => outcome.merge(chunk_outcome),
            Ok(Err(err)) => warn!(target: channel::INGEST, "parse worker failed: {}", err),
            Err(err) => warn!(target: channel::INGEST, "parse task failed: {}", err),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::super::line::testutil::fund_line;
    use super::*;
    use std::collections::BTreeMap;

    fn sample_file(valid: usize, invalid: usize) -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..valid {
            // Unique (date, ticker) per line: spread across days of 2023
            let day = (i % 28) + 1;
            let month = (i / 28) % 12 + 1;
            let ticker = format!("FI{:02}11", i % 90);
            let line = fund_line(
                &format!("2023{:02}{:02}", month, day),
                &ticker,
                1000 + i as u64,
                1100 + i as u64,
            );
            data.extend_from_slice(&line);
            data.push(b'\n');
        }
        for _ in 0..invalid {
            data.extend_from_slice(b"99UNPARSEABLE");
            data.push(b'\n');
        }
        data
    }

    fn multiset(records: &[QuoteRecord]) -> BTreeMap<(String, String), usize> {
        let mut counts = BTreeMap::new();
        for r in records {
            *counts
                .entry((r.trade_date.to_string(), r.ticker.clone()))
                .or_default() += 1;
        }
        counts
    }

    #[test]
    fn counts_valid_and_skipped() {
        let data = sample_file(25, 7);
        let outcome = parse_lines(&data);
        assert_eq!(outcome.records.len(), 25);
        assert_eq!(outcome.skipped, 7);
    }

    #[test]
    fn blank_lines_do_not_count() {
        let outcome = parse_lines(b"\n\n\n");
        assert_eq!(outcome.records.len(), 0);
        assert_eq!(outcome.skipped, 0);
    }

    #[test]
    fn boundaries_are_line_aligned_and_cover_buffer() {
        let data = sample_file(10, 0);
        let chunks = chunk_boundaries(&data, 3);

        assert_eq!(chunks.first().unwrap().0, 0);
        assert_eq!(chunks.last().unwrap().1, data.len());
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
            // Every boundary sits right after a newline
            assert_eq!(data[pair[0].1 - 1], b'\n');
        }
    }

    #[tokio::test]
    async fn parallel_parse_matches_sequential() {
        let data = sample_file(1000, 50);
        let sequential = parse_lines(&data);

        let parallel = parse_parallel(Arc::new(data), 64, 4).await;

        assert_eq!(parallel.records.len(), sequential.records.len());
        assert_eq!(parallel.skipped, sequential.skipped);
        assert_eq!(multiset(&parallel.records), multiset(&sequential.records));
    }

    #[tokio::test]
    async fn single_chunk_short_circuits() {
        let data = sample_file(5, 1);
        let outcome = parse_parallel(Arc::new(data), 100_000, 4).await;
        assert_eq!(outcome.records.len(), 5);
        assert_eq!(outcome.skipped, 1);
    }
}
