//! Application settings and configuration

use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// SQLite store configuration
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Archive downloader configuration
    #[serde(default)]
    pub downloader: DownloaderSettings,
    /// Ingest pipeline configuration
    #[serde(default)]
    pub ingest: IngestSettings,
    /// Query cache configuration
    #[serde(default)]
    pub cache: CacheSettings,
}

/// SQLite store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Engine busy timeout in seconds
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Batch sizing thresholds for bulk inserts
    #[serde(default)]
    pub batch: BatchSettings,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("fii_quotes.db")
}

fn default_busy_timeout() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    4
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_secs: default_busy_timeout(),
            max_connections: default_max_connections(),
            batch: BatchSettings::default(),
        }
    }
}

/// Batch sizing thresholds for bulk inserts.
///
/// The batch row count is picked from the approximate payload size so a
/// single transaction never carries more than `max_bytes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    #[serde(default = "default_batch_small")]
    pub small: usize,
    #[serde(default = "default_batch_medium")]
    pub medium: usize,
    #[serde(default = "default_batch_large")]
    pub large: usize,
    #[serde(default = "default_batch_max_bytes")]
    pub max_bytes: usize,
}

fn default_batch_small() -> usize {
    1_000
}

fn default_batch_medium() -> usize {
    5_000
}

fn default_batch_large() -> usize {
    10_000
}

fn default_batch_max_bytes() -> usize {
    1_048_576 // 1 MiB
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            small: default_batch_small(),
            medium: default_batch_medium(),
            large: default_batch_large(),
            max_bytes: default_batch_max_bytes(),
        }
    }
}

/// Archive downloader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderSettings {
    /// Root URL the exchange publishes archives under (https only)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Staging directory for downloaded archives
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory for certificate pins and pin history
    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,
    /// Maximum retries for transient download failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Retry delay is backoff_factor ^ attempt seconds
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Politeness delay range between downloads, seconds [min, max]
    #[serde(default = "default_wait_between_downloads")]
    pub wait_between_downloads: [f64; 2],
    /// Accept a changed certificate pin when the stored one is older than
    /// this many days
    #[serde(default = "default_cert_rotation_days")]
    pub cert_rotation_days: i64,
    /// Treat a pin mismatch as a hard failure instead of a warning
    #[serde(default)]
    pub pin_mismatch_fatal: bool,
    /// Warn when a downloaded archive is smaller than this
    #[serde(default = "default_min_archive_bytes")]
    pub min_archive_bytes: u64,
    /// HTTP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// HTTP request (read) timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// User-Agent header for archive requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "https://bvmf.bmfbovespa.com.br/InstDados/SerHist".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_cert_dir() -> PathBuf {
    PathBuf::from("certs")
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_wait_between_downloads() -> [f64; 2] {
    [3.0, 7.0]
}

fn default_cert_rotation_days() -> i64 {
    7
}

fn default_min_archive_bytes() -> u64 {
    100
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    60
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36".to_string()
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            data_dir: default_data_dir(),
            cert_dir: default_cert_dir(),
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
            wait_between_downloads: default_wait_between_downloads(),
            cert_rotation_days: default_cert_rotation_days(),
            pin_mismatch_fatal: false,
            min_archive_bytes: default_min_archive_bytes(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Ingest pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Lines per parse chunk for monthly/yearly archives
    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,
    /// Parser worker count; defaults to available cores minus one
    #[serde(default)]
    pub workers: Option<usize>,
    /// Retries for ZIP extraction
    #[serde(default = "default_extract_retries")]
    pub extract_retries: u32,
    /// Delay between extraction attempts, seconds
    #[serde(default = "default_extract_retry_delay")]
    pub extract_retry_delay_secs: f64,
}

fn default_chunk_lines() -> usize {
    100_000
}

fn default_extract_retries() -> u32 {
    3
}

fn default_extract_retry_delay() -> f64 {
    2.0
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunk_lines: default_chunk_lines(),
            workers: None,
            extract_retries: default_extract_retries(),
            extract_retry_delay_secs: default_extract_retry_delay(),
        }
    }
}

impl IngestSettings {
    /// Effective worker count: configured value, or cores minus one.
    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1)
                .max(1)
        })
    }
}

/// Query cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Default TTL for namespaces without an explicit policy, seconds
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,
    /// Default max entries per namespace
    #[serde(default = "default_cache_max_size")]
    pub max_entries: usize,
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_max_size() -> usize {
    1_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl(),
            max_entries: default_cache_max_size(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix("FII_MANAGER")
    }

    /// Load settings with a custom environment variable prefix
    pub fn load_with_prefix(env_prefix: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = Self::config_dir();

        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // Environment variables, e.g. FII_MANAGER__DOWNLOADER__BASE_URL
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    fn config_dir() -> String {
        std::env::var("FII_MANAGER_CONFIG_DIR").unwrap_or_else(|_| "config".into())
    }

    /// Create default settings (useful for testing)
    pub fn default_settings() -> Self {
        Settings {
            database: DatabaseSettings::default(),
            downloader: DownloaderSettings::default(),
            ingest: IngestSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::default_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_sane() {
        let settings = Settings::default_settings();
        assert_eq!(settings.database.busy_timeout_secs, 30);
        assert_eq!(settings.ingest.chunk_lines, 100_000);
        assert!(settings.downloader.base_url.starts_with("https://"));
        assert!(!settings.downloader.pin_mismatch_fatal);
    }

    #[test]
    fn effective_workers_is_at_least_one() {
        let mut ingest = IngestSettings::default();
        assert!(ingest.effective_workers() >= 1);

        ingest.workers = Some(6);
        assert_eq!(ingest.effective_workers(), 6);
    }

    #[test]
    fn wait_range_default_is_ordered() {
        let d = DownloaderSettings::default();
        assert!(d.wait_between_downloads[0] <= d.wait_between_downloads[1]);
    }
}
