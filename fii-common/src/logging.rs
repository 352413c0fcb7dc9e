//! Logging configuration and initialization.
//!
//! Components log through `tracing` with a fixed set of channel targets,
//! so operators can filter per concern (`RUST_LOG=security=debug,info`).

use std::env;

use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log channel targets used across the pipeline.
///
/// Usage: `tracing::info!(target: channel::INGEST, "...")`.
pub mod channel {
    pub const DOWNLOAD: &str = "download";
    pub const INGEST: &str = "ingest";
    pub const SECURITY: &str = "security";
    pub const CACHE: &str = "cache";
    pub const DB: &str = "db";
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable format with colors (default for terminals)
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl LogFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Timestamp format for log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    /// Local time with timezone (default)
    #[default]
    Local,
    /// UTC time (ISO 8601)
    Utc,
    /// No timestamps
    None,
}

impl TimestampFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "utc" => TimestampFormat::Utc,
            "none" | "off" => TimestampFormat::None,
            _ => TimestampFormat::Local,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub timestamps: TimestampFormat,
    /// Default filter used when RUST_LOG is not set
    pub default_level: String,
    /// Include source file location
    pub include_location: bool,
    /// Include target (channel / module path)
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            timestamps: TimestampFormat::Local,
            default_level: "info".to_string(),
            include_location: false,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables.
    ///
    /// Reads `LOG_FORMAT` (pretty/compact), `LOG_TIMESTAMPS`
    /// (local/utc/none), `LOG_LEVEL` (fallback when RUST_LOG is unset)
    /// and `LOG_LOCATION` (true/false).
    pub fn from_env() -> Self {
        Self {
            format: env::var("LOG_FORMAT")
                .map(|s| LogFormat::from_str(&s))
                .unwrap_or_default(),
            timestamps: env::var("LOG_TIMESTAMPS")
                .map(|s| TimestampFormat::from_str(&s))
                .unwrap_or_default(),
            default_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            include_location: env::var("LOG_LOCATION")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
            include_target: true,
        }
    }

    pub fn with_default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }
}

/// Initialize logging with the given configuration.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let layer = fmt::layer()
        .with_target(config.include_target)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_level(true)
        .with_ansi(atty::is(atty::Stream::Stdout));

    match config.timestamps {
        TimestampFormat::Local => {
            let layer = layer.with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f %z".to_string()));
            registry.with(layer).try_init()?;
        }
        TimestampFormat::Utc => {
            let layer = layer.with_timer(ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.3fZ".to_string()));
            registry.with(layer).try_init()?;
        }
        TimestampFormat::None => {
            let layer = layer.without_time();
            registry.with(layer).try_init()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_from_str() {
        assert_eq!(LogFormat::from_str("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::from_str("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("unknown"), LogFormat::Pretty);
    }

    #[test]
    fn timestamp_format_from_str() {
        assert_eq!(TimestampFormat::from_str("utc"), TimestampFormat::Utc);
        assert_eq!(TimestampFormat::from_str("off"), TimestampFormat::None);
        assert_eq!(TimestampFormat::from_str("local"), TimestampFormat::Local);
    }

    #[test]
    fn log_config_builder() {
        let config = LogConfig::default().with_default_level("debug");
        assert_eq!(config.default_level, "debug");
        assert!(config.include_target);
    }
}
