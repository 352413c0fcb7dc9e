//! Archive classification from COTAHIST filenames.
//!
//! The exchange publishes three shapes:
//! - `COTAHIST_D<DDMMYYYY>.ZIP`: one trading day
//! - `COTAHIST_M<MMYYYY>.ZIP`: one month
//! - `COTAHIST_A<YYYY>.ZIP`: one year
//!
//! `.TXT` is accepted alongside `.ZIP` for files that were already
//! extracted by hand.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, NaiveDate};
use thiserror::Error;

const PREFIX: &str = "COTAHIST_";

/// Period shape of a quote archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArchiveKind {
    Daily,
    Monthly,
    Yearly,
}

impl ArchiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveKind::Daily => "daily",
            ArchiveKind::Monthly => "monthly",
            ArchiveKind::Yearly => "yearly",
        }
    }

    /// Parse the value stored in the ledger.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(ArchiveKind::Daily),
            "monthly" => Some(ArchiveKind::Monthly),
            "yearly" => Some(ArchiveKind::Yearly),
            _ => None,
        }
    }
}

/// Errors raised while classifying an archive name.
#[derive(Error, Debug)]
pub enum ArchiveNameError {
    #[error("Unrecognized archive name: {0}")]
    UnrecognizedName(String),

    #[error("Invalid date in archive name '{name}': {reason}")]
    InvalidDate { name: String, reason: String },
}

/// One exchange archive, classified and carrying its date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteArchive {
    pub path: PathBuf,
    pub name: String,
    pub kind: ArchiveKind,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

impl QuoteArchive {
    /// Classify an archive from its path. The filename decides everything;
    /// the file itself is not touched.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, ArchiveNameError> {
        let path = path.into();
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_uppercase();

        let (kind, date_from, date_to) = classify(&name)?;

        Ok(Self {
            path,
            name,
            kind,
            date_from,
            date_to,
        })
    }

    /// Generate the published filename for a daily archive.
    pub fn daily_name(date: NaiveDate) -> String {
        format!("{}D{}.ZIP", PREFIX, date.format("%d%m%Y"))
    }

    /// Generate the published filename for a monthly archive.
    pub fn monthly_name(year: i32, month: u32) -> String {
        format!("{}M{:02}{:04}.ZIP", PREFIX, month, year)
    }

    /// Generate the published filename for a yearly archive.
    pub fn yearly_name(year: i32) -> String {
        format!("{}A{:04}.ZIP", PREFIX, year)
    }

    /// Path of the extracted text companion (same stem, `.TXT`).
    pub fn text_path(&self) -> PathBuf {
        self.path.with_extension("TXT")
    }

    /// True for names this pipeline ingests.
    pub fn is_archive_name(name: &str) -> bool {
        let upper = name.to_uppercase();
        upper.starts_with(PREFIX) && (upper.ends_with(".ZIP") || upper.ends_with(".TXT"))
    }
}

impl fmt::Display for QuoteArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}: {} to {})",
            self.name,
            self.kind.as_str(),
            self.date_from,
            self.date_to
        )
    }
}

fn classify(name: &str) -> Result<(ArchiveKind, NaiveDate, NaiveDate), ArchiveNameError> {
    let stem = name
        .strip_suffix(".ZIP")
        .or_else(|| name.strip_suffix(".TXT"))
        .ok_or_else(|| ArchiveNameError::UnrecognizedName(name.to_string()))?;

    let body = stem
        .strip_prefix(PREFIX)
        .ok_or_else(|| ArchiveNameError::UnrecognizedName(name.to_string()))?;

    if body.is_empty() {
        return Err(ArchiveNameError::UnrecognizedName(name.to_string()));
    }
    let (marker, digits) = body.split_at(1);

    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ArchiveNameError::UnrecognizedName(name.to_string()));
    }

    let invalid_date = |reason: &str| ArchiveNameError::InvalidDate {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    match (marker, digits.len()) {
        ("D", 8) => {
            // DDMMYYYY
            let day: u32 = digits[0..2].parse().unwrap();
            let month: u32 = digits[2..4].parse().unwrap();
            let year: i32 = digits[4..8].parse().unwrap();
            let date = NaiveDate::from_ymd_opt(year, month, day)
                .ok_or_else(|| invalid_date("no such calendar day"))?;
            Ok((ArchiveKind::Daily, date, date))
        }
        ("M", 6) => {
            // MMYYYY
            let month: u32 = digits[0..2].parse().unwrap();
            let year: i32 = digits[2..6].parse().unwrap();
            let from = NaiveDate::from_ymd_opt(year, month, 1)
                .ok_or_else(|| invalid_date("no such month"))?;
            let to = last_day_of_month(year, month);
            Ok((ArchiveKind::Monthly, from, to))
        }
        ("A", 4) => {
            // YYYY
            let year: i32 = digits.parse().unwrap();
            let from = NaiveDate::from_ymd_opt(year, 1, 1)
                .ok_or_else(|| invalid_date("no such year"))?;
            let to = NaiveDate::from_ymd_opt(year, 12, 31).unwrap();
            Ok((ArchiveKind::Yearly, from, to))
        }
        _ => Err(ArchiveNameError::UnrecognizedName(name.to_string())),
    }
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1).unwrap()
    };
    first_of_next - Duration::days(1)
}
