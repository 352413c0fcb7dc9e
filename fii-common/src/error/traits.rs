//! Error classification for retry logic.
//!
//! Errors self-describe their characteristics so that generic retry
//! helpers do not need to know concrete error types.

use std::time::Duration;

use super::common::*;

/// Classification of error types for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// May resolve on retry (network hiccups, busy store)
    Transient,
    /// Will not resolve on retry (bad input, missing file, 404)
    Permanent,
    /// Configuration problems; fatal at startup
    Configuration,
    /// Bugs or unexpected state
    Internal,
}

/// Trait for errors that can classify themselves for retry logic.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error may succeed on retry
    fn is_transient(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }

    /// Returns true if this error will not succeed on retry
    fn is_permanent(&self) -> bool {
        matches!(self.category(), ErrorCategory::Permanent)
    }

    /// Suggests a delay before retrying, if applicable
    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_millis(500)),
            _ => None,
        }
    }
}

impl ErrorClassification for StoreError {
    fn category(&self) -> ErrorCategory {
        match self {
            StoreError::Connection(_) => ErrorCategory::Transient,
            StoreError::Busy(_) => ErrorCategory::Transient,
            StoreError::Timeout(_) => ErrorCategory::Transient,
            StoreError::Query(_) => ErrorCategory::Permanent,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            StoreError::Busy(_) => Some(Duration::from_secs(2)),
            StoreError::Timeout(_) => Some(Duration::from_millis(500)),
            StoreError::Connection(_) => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

impl ErrorClassification for ConfigurationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

impl ErrorClassification for SerializationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Permanent
    }
}

impl ErrorClassification for ValidationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Permanent
    }
}

/// Retry an async operation with exponential backoff.
///
/// Transient errors are retried up to `max_attempts` with the delay
/// doubling from `initial_delay` (capped at 30s); the error's own
/// suggested delay wins when it provides one. Permanent errors return
/// immediately.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    initial_delay: Duration,
) -> Result<T, E>
where
    E: ErrorClassification + std::fmt::Debug,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    let mut delay = initial_delay;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempts += 1;

                if !err.is_transient() || attempts >= max_attempts {
                    return Err(err);
                }

                let retry_delay = err.suggested_retry_delay().unwrap_or(delay);
                tokio::time::sleep(retry_delay).await;

                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn store_error_classification() {
        let err = StoreError::Busy("database is locked".to_string());
        assert!(err.is_transient());
        assert!(err.suggested_retry_delay().is_some());

        let err = StoreError::Query("syntax error".to_string());
        assert!(err.is_permanent());
    }

    #[test]
    fn validation_error_is_permanent() {
        assert!(ValidationError::required("factor").is_permanent());
    }

    #[tokio::test]
    async fn retry_stops_on_permanent_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), StoreError> = retry_with_backoff(
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StoreError::Query("no such table".into()))
                }
            },
            5,
            Duration::from_millis(1),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<u32, StoreError> = retry_with_backoff(
            move || {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(StoreError::Busy("locked".into()))
                    } else {
                        Ok(n)
                    }
                }
            },
            5,
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
