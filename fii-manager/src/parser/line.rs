//! Fixed-width line decoder for COTAHIST records.
//!
//! Only market-record lines (type `01`) carrying the fund-ticker BDI
//! class (`12`) are decoded; everything else is skipped. The file is
//! ISO-8859-1 encoded, but every field this pipeline extracts is ASCII,
//! so decoding operates on raw bytes.
//!
//! Money fields use the exchange's `(11)V99` layout: digits only, with
//! two implied decimal places.

use chrono::NaiveDate;

/// Minimum line length for a type-01 record.
pub const RECORD_MIN_LEN: usize = 245;

const RECORD_TYPE_QUOTE: &[u8] = b"01";
const BDI_FUND: &[u8] = b"12";

// Field windows, 0-indexed half-open (layout document is 1-indexed
// inclusive).
const F_RECORD_TYPE: (usize, usize) = (0, 2);
const F_TRADE_DATE: (usize, usize) = (2, 10);
const F_BDI: (usize, usize) = (10, 12);
const F_TICKER: (usize, usize) = (12, 24);
const F_OPEN: (usize, usize) = (56, 69);
const F_HIGH: (usize, usize) = (69, 82);
const F_LOW: (usize, usize) = (82, 95);
const F_CLOSE: (usize, usize) = (108, 121);
const F_TRADE_COUNT: (usize, usize) = (147, 152);
const F_QUANTITY: (usize, usize) = (152, 170);
const F_VOLUME: (usize, usize) = (170, 188);

/// One decoded quote row. Prices and volume carry the implied two
/// decimals already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRecord {
    pub trade_date: NaiveDate,
    pub ticker: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: i64,
    pub quantity: i64,
}

impl QuoteRecord {
    /// Rough wire size of one row, used for batch sizing.
    pub const APPROX_BYTES: usize = 100;
}

fn field(line: &[u8], range: (usize, usize)) -> &[u8] {
    &line[range.0..range.1]
}

fn trimmed(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != b' ');
    match start {
        Some(start) => {
            let end = bytes.iter().rposition(|b| *b != b' ').unwrap_or(start);
            &bytes[start..=end]
        }
        None => &[],
    }
}

/// Parse a `(n)V99` money field: all digits, two implied decimals.
/// Empty (all spaces) decodes as zero, matching the exchange layout.
fn parse_money(bytes: &[u8]) -> Option<f64> {
    let digits = trimmed(bytes);
    if digits.is_empty() {
        return Some(0.0);
    }
    if !digits.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let raw: u64 = std::str::from_utf8(digits).ok()?.parse().ok()?;
    Some(raw as f64 / 100.0)
}

fn parse_integer(bytes: &[u8]) -> Option<i64> {
    let digits = trimmed(bytes);
    if digits.is_empty() {
        return Some(0);
    }
    if !digits.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn parse_date(bytes: &[u8]) -> Option<NaiveDate> {
    let s = std::str::from_utf8(bytes).ok()?;
    NaiveDate::parse_from_str(s, "%Y%m%d").ok()
}

/// Decode one line.
///
/// Returns `None` both for lines that are not fund-ticker quote records
/// (headers, trailers, other instrument classes) and for malformed
/// retained lines; the caller counts the latter through
/// [`super::ParseOutcome`]. The distinction does not matter downstream;
/// in both cases no row is produced and the file continues.
pub fn parse_line(line: &[u8]) -> Option<QuoteRecord> {
    // Strip the newline terminator if present
    let line = match line.last() {
        Some(b'\n') => &line[..line.len() - 1],
        _ => line,
    };
    let line = match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    };

    if line.len() < RECORD_MIN_LEN {
        return None;
    }
    if field(line, F_RECORD_TYPE) != RECORD_TYPE_QUOTE {
        return None;
    }
    if trimmed(field(line, F_BDI)) != BDI_FUND {
        return None;
    }

    let trade_date = parse_date(field(line, F_TRADE_DATE))?;

    let ticker_bytes = trimmed(field(line, F_TICKER));
    if ticker_bytes.is_empty() {
        return None;
    }
    let ticker = std::str::from_utf8(ticker_bytes).ok()?.to_string();

    Some(QuoteRecord {
        trade_date,
        ticker,
        open: parse_money(field(line, F_OPEN))?,
        high: parse_money(field(line, F_HIGH))?,
        low: parse_money(field(line, F_LOW))?,
        close: parse_money(field(line, F_CLOSE))?,
        volume: parse_money(field(line, F_VOLUME))?,
        trade_count: parse_integer(field(line, F_TRADE_COUNT))?,
        quantity: parse_integer(field(line, F_QUANTITY))?,
    })
}

/// True when the line looks like a retained record (type 01, BDI 12) even
/// if its payload later turns out malformed.
#[cfg(test)]
fn is_candidate(line: &[u8]) -> bool {
    line.len() >= RECORD_MIN_LEN
        && field(line, F_RECORD_TYPE) == RECORD_TYPE_QUOTE
        && trimmed(field(line, F_BDI)) == BDI_FUND
}

#[cfg(test)]
pub(crate) mod testutil {
    /// Build a full-width COTAHIST line for tests. Values are in cents.
    pub fn build_line(
        record_type: &str,
        date: &str,
        bdi: &str,
        ticker: &str,
        open: u64,
        high: u64,
        low: u64,
        close: u64,
        trade_count: u64,
        quantity: u64,
        volume: u64,
    ) -> Vec<u8> {
        let mut line = vec![b' '; 245];
        let mut put = |start: usize, text: &str| {
            line[start..start + text.len()].copy_from_slice(text.as_bytes());
        };
        put(0, record_type);
        put(2, date);
        put(10, bdi);
        put(12, &format!("{:<12}", ticker));
        put(56, &format!("{:013}", open));
        put(69, &format!("{:013}", high));
        put(82, &format!("{:013}", low));
        put(108, &format!("{:013}", close));
        put(147, &format!("{:05}", trade_count));
        put(152, &format!("{:018}", quantity));
        put(170, &format!("{:018}", volume));
        line
    }

    /// A valid fund-ticker line with the given close price in cents.
    pub fn fund_line(date: &str, ticker: &str, open: u64, close: u64) -> Vec<u8> {
        build_line("01", date, "12", ticker, open, close, open, close, 10, 500, 52_500)
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn decodes_a_fund_line() {
        // open=1000 close=1050 cents, as in the daily-ingest scenario
        let line = fund_line("20250318", "ABCD11", 1000, 1050);
        let rec = parse_line(&line).unwrap();

        assert_eq!(rec.trade_date, NaiveDate::from_ymd_opt(2025, 3, 18).unwrap());
        assert_eq!(rec.ticker, "ABCD11");
        assert_eq!(rec.open, 10.00);
        assert_eq!(rec.close, 10.50);
        assert_eq!(rec.trade_count, 10);
        assert_eq!(rec.quantity, 500);
        assert_eq!(rec.volume, 525.00);
    }

    #[test]
    fn skips_other_record_types_and_classes() {
        let header = build_line("00", "20250318", "12", "ABCD11", 1, 1, 1, 1, 1, 1, 1);
        assert!(parse_line(&header).is_none());

        // BDI 02 is a common stock, not a fund
        let stock = build_line("01", "20250318", "02", "PETR4", 1, 1, 1, 1, 1, 1, 1);
        assert!(parse_line(&stock).is_none());
    }

    #[test]
    fn skips_short_lines() {
        assert!(parse_line(b"01SHORT").is_none());
        assert!(parse_line(b"").is_none());
    }

    #[test]
    fn malformed_date_is_rejected() {
        let line = build_line("01", "2025XX18", "12", "ABCD11", 1, 1, 1, 1, 1, 1, 1);
        assert!(parse_line(&line).is_none());
        assert!(is_candidate(&line));
    }

    #[test]
    fn malformed_number_is_rejected() {
        let mut line = fund_line("20250318", "ABCD11", 1000, 1050);
        // Corrupt the close field with a letter
        line[110] = b'X';
        assert!(parse_line(&line).is_none());
        assert!(is_candidate(&line));
    }

    #[test]
    fn empty_ticker_is_rejected() {
        let line = build_line("01", "20250318", "12", "", 1, 1, 1, 1, 1, 1, 1);
        assert!(parse_line(&line).is_none());
    }

    #[test]
    fn blank_money_field_decodes_as_zero() {
        let mut line = fund_line("20250318", "ABCD11", 1000, 1050);
        for b in &mut line[56..69] {
            *b = b' ';
        }
        let rec = parse_line(&line).unwrap();
        assert_eq!(rec.open, 0.0);
    }

    #[test]
    fn handles_trailing_newlines() {
        let mut line = fund_line("20250318", "ABCD11", 1000, 1050);
        line.extend_from_slice(b"\r\n");
        assert!(parse_line(&line).is_some());
    }
}
