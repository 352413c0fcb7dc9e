//! Common error types shared across the workspace.
//!
//! Crate-specific errors wrap these using `#[from]`.

use std::time::Duration;
use thiserror::Error;

/// Store-related errors.
///
/// Covers queries, connections and transactions against the SQLite store.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// Query execution failed
    #[error("Query failed: {0}")]
    Query(String),

    /// Opening or connecting to the store failed
    #[error("Store connection failed: {0}")]
    Connection(String),

    /// The engine reported the database as busy/locked
    #[error("Store busy: {0}")]
    Busy(String),

    /// Operation exceeded the busy timeout
    #[error("Store timeout after {0:?}")]
    Timeout(Duration),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => StoreError::Timeout(Duration::from_secs(30)),
            sqlx::Error::Io(_) => StoreError::Connection(err.to_string()),
            sqlx::Error::Database(db) if db.message().contains("locked") => {
                StoreError::Busy(db.message().to_string())
            }
            _ => StoreError::Query(err.to_string()),
        }
    }
}

/// Configuration errors. Fatal at startup.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Required field is missing
    #[error("Missing required setting: {0}")]
    MissingField(String),

    /// Field has an invalid value
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Configuration source could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Serialization and parsing errors (JSON import files, cached values).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SerializationError {
    #[error("JSON error: {0}")]
    Json(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl From<serde_json::Error> for SerializationError {
    fn from(err: serde_json::Error) -> Self {
        SerializationError::Json(err.to_string())
    }
}

/// Validation errors for data integrity checks (corporate-action import).
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ValidationError {
    /// Value is out of the allowed range
    #[error("{field} value {value} is out of range (must be {requirement})")]
    OutOfRange {
        field: &'static str,
        value: String,
        requirement: &'static str,
    },

    /// Required field is empty or missing
    #[error("{field} is required but was empty")]
    Required { field: &'static str },

    /// Field has an invalid format
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: &'static str, reason: String },

    /// Conflicting duplicate of an existing row
    #[error("conflicts with existing row: {0}")]
    Conflict(String),
}

impl ValidationError {
    /// Create a Required validation error
    pub fn required(field: &'static str) -> Self {
        ValidationError::Required { field }
    }

    /// Create an OutOfRange validation error
    pub fn out_of_range(
        field: &'static str,
        value: impl ToString,
        requirement: &'static str,
    ) -> Self {
        ValidationError::OutOfRange {
            field,
            value: value.to_string(),
            requirement,
        }
    }

    /// Create an InvalidFormat validation error
    pub fn invalid_format(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_constructors() {
        let err = ValidationError::required("ticker");
        assert!(err.to_string().contains("ticker is required"));

        let err = ValidationError::out_of_range("factor", "-2", "> 0");
        assert!(err.to_string().contains("out of range"));

        let err = ValidationError::invalid_format("effective_date", "not a date");
        assert!(err.to_string().contains("invalid format"));
    }

    #[test]
    fn store_error_maps_busy_timeouts() {
        let err = StoreError::Busy("database is locked".to_string());
        assert!(err.to_string().contains("busy"));

        let err = StoreError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));
    }
}
