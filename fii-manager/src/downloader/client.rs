//! Archive download client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use reqwest::{Client, StatusCode, Url};
use tracing::{info, warn};

use fii_common::error::{ErrorCategory, ErrorClassification};
use fii_common::logging::channel;

use crate::config::DownloaderSettings;

use super::pinning::{CertificatePinner, PinVerdict};

/// Downloader failures, classified for the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The archive is not on the server (HTTP 404). The exchange has not
    /// published it yet; retry on a later day, not a later second.
    #[error("archive not yet published: {0}")]
    NotYetPublished(String),

    /// Non-success HTTP status
    #[error("request failed: HTTP {0}")]
    Status(u16),

    /// Connection or read failure
    #[error("network error: {0}")]
    Network(String),

    /// Downloaded file failed integrity checks
    #[error("integrity violation for {name}: {reason}")]
    Integrity { name: String, reason: String },

    /// Certificate pin mismatch with strict pinning enabled
    #[error("certificate pin mismatch for {host}")]
    PinMismatch { host: String },

    /// TLS fingerprint probe failed
    #[error("certificate probe failed: {0}")]
    Probe(String),

    /// Only https base URLs are accepted
    #[error("insecure base url: {0}")]
    InsecureUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorClassification for DownloadError {
    fn category(&self) -> ErrorCategory {
        match self {
            DownloadError::NotYetPublished(_) => ErrorCategory::Permanent,
            DownloadError::Status(code) if *code >= 500 => ErrorCategory::Transient,
            DownloadError::Status(_) => ErrorCategory::Permanent,
            DownloadError::Network(_) => ErrorCategory::Transient,
            DownloadError::Integrity { .. } => ErrorCategory::Permanent,
            DownloadError::PinMismatch { .. } => ErrorCategory::Permanent,
            DownloadError::Probe(_) => ErrorCategory::Transient,
            DownloadError::InsecureUrl(_) => ErrorCategory::Configuration,
            DownloadError::Io(_) => ErrorCategory::Transient,
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status == StatusCode::NOT_FOUND {
                return DownloadError::NotYetPublished(err.to_string());
            }
            return DownloadError::Status(status.as_u16());
        }
        DownloadError::Network(err.to_string())
    }
}

/// Result of one successful fetch.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub path: PathBuf,
    pub bytes: u64,
    pub members: usize,
    pub attempts: u32,
}

/// Downloads exchange archives with retries, pinning and verification.
#[derive(Debug)]
pub struct ArchiveDownloader {
    client: Client,
    settings: DownloaderSettings,
    base_url: Url,
    host: String,
    pinner: CertificatePinner,
    /// Set once the first download of this run completes, to space out
    /// the following ones.
    downloaded_once: bool,
}

impl ArchiveDownloader {
    pub fn new(settings: DownloaderSettings) -> Result<Self, DownloadError> {
        let base_url = Url::parse(settings.base_url.trim_end_matches('/'))
            .map_err(|e| DownloadError::InsecureUrl(format!("{}: {}", settings.base_url, e)))?;
        if base_url.scheme() != "https" {
            return Err(DownloadError::InsecureUrl(settings.base_url.clone()));
        }
        let host = base_url
            .host_str()
            .ok_or_else(|| DownloadError::InsecureUrl(settings.base_url.clone()))?
            .to_string();

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        let pinner = CertificatePinner::load(settings.cert_dir.clone(), settings.cert_rotation_days)?;

        Ok(Self {
            client,
            settings,
            base_url,
            host,
            pinner,
            downloaded_once: false,
        })
    }

    fn archive_url(&self, archive_name: &str) -> Result<Url, DownloadError> {
        let joined = format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), archive_name);
        Url::parse(&joined).map_err(|e| DownloadError::Network(e.to_string()))
    }

    /// True when the server currently lists the archive.
    pub async fn is_published(&self, archive_name: &str) -> Result<bool, DownloadError> {
        let url = self.archive_url(archive_name)?;
        let response = self.client.head(url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_server_error() => Err(DownloadError::Status(status.as_u16())),
            status => {
                warn!(target: channel::DOWNLOAD, "unexpected HEAD status {} for {}", status, archive_name);
                Ok(false)
            }
        }
    }

    /// Fetch one archive to `destination`.
    ///
    /// A 404 on the pre-check returns [`DownloadError::NotYetPublished`]
    /// without touching the retry budget. Transient failures are retried
    /// with delay `backoff_factor ^ attempt` seconds.
    pub async fn fetch(
        &mut self,
        archive_name: &str,
        destination: &Path,
    ) -> Result<FetchReport, DownloadError> {
        if self.downloaded_once {
            self.politeness_delay().await;
        }

        match self.is_published(archive_name).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(DownloadError::NotYetPublished(archive_name.to_string()));
            }
            // The GET below carries the retry budget and surfaces a real 404
            Err(err) if err.is_transient() => {
                warn!(target: channel::DOWNLOAD, "pre-check for {} failed, proceeding: {}", archive_name, err)
            }
            Err(err) => return Err(err),
        }

        match self.pinner.check_host(&self.host).await {
            Ok(PinVerdict::Mismatch { .. }) if self.settings.pin_mismatch_fatal => {
                return Err(DownloadError::PinMismatch {
                    host: self.host.clone(),
                });
            }
            Ok(_) => {}
            // A failed probe never blocks the download; the transfer
            // itself still runs full certificate verification.
            Err(err) => {
                warn!(target: channel::SECURITY, "fingerprint probe failed for {}: {}", self.host, err)
            }
        }

        let url = self.archive_url(archive_name)?;
        let mut attempt = 0u32;
        loop {
            match self.fetch_once(&url, destination).await {
                Ok(bytes) => {
                    let members = self.verify(archive_name, destination, bytes)?;
                    self.downloaded_once = true;
                    info!(
                        target: channel::DOWNLOAD,
                        "{} downloaded ({} bytes, {} member{})",
                        archive_name,
                        bytes,
                        members,
                        if members == 1 { "" } else { "s" }
                    );
                    return Ok(FetchReport {
                        path: destination.to_path_buf(),
                        bytes,
                        members,
                        attempts: attempt + 1,
                    });
                }
                Err(err) if err.is_transient() && attempt + 1 < self.settings.max_retries => {
                    attempt += 1;
                    let delay = self.settings.backoff_factor.powi(attempt as i32);
                    warn!(
                        target: channel::DOWNLOAD,
                        "attempt {}/{} for {} failed ({}), retrying in {:.1}s",
                        attempt,
                        self.settings.max_retries,
                        archive_name,
                        err,
                        delay
                    );
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_once(&self, url: &Url, destination: &Path) -> Result<u64, DownloadError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DownloadError::NotYetPublished(url.to_string()));
        }
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(destination, &body)?;
        Ok(body.len() as u64)
    }

    /// Post-download integrity checks: parseable ZIP central directory
    /// with at least one member; a warning when the file is suspiciously
    /// small.
    fn verify(&self, name: &str, path: &Path, bytes: u64) -> Result<usize, DownloadError> {
        if bytes < self.settings.min_archive_bytes {
            warn!(
                target: channel::DOWNLOAD,
                "{} is only {} bytes (threshold {})",
                name,
                bytes,
                self.settings.min_archive_bytes
            );
        }

        let file = std::fs::File::open(path)?;
        let archive = zip::ZipArchive::new(file).map_err(|e| DownloadError::Integrity {
            name: name.to_string(),
            reason: format!("not a valid ZIP: {}", e),
        })?;

        if archive.is_empty() {
            return Err(DownloadError::Integrity {
                name: name.to_string(),
                reason: "ZIP has no members".to_string(),
            });
        }
        Ok(archive.len())
    }

    async fn politeness_delay(&self) {
        let [min, max] = self.settings.wait_between_downloads;
        let max = max.max(min);
        let wait = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        if wait > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings(dir: &Path) -> DownloaderSettings {
        DownloaderSettings {
            data_dir: dir.join("data"),
            cert_dir: dir.join("certs"),
            ..DownloaderSettings::default()
        }
    }

    #[test]
    fn rejects_http_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DownloaderSettings {
            base_url: "http://example.com/hist".to_string(),
            ..settings(dir.path())
        };
        let err = ArchiveDownloader::new(cfg).unwrap_err();
        assert!(matches!(err, DownloadError::InsecureUrl(_)));
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn not_yet_published_is_permanent() {
        // A 404 means the exchange has not posted the file; retrying in
        // seconds is pointless, retrying tomorrow is the scheduler's job.
        let err = DownloadError::NotYetPublished("COTAHIST_D01012099.ZIP".into());
        assert!(err.is_permanent());
        assert!(!err.is_transient());
    }

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        assert!(DownloadError::Status(503).is_transient());
        assert!(DownloadError::Status(403).is_permanent());
    }

    #[test]
    fn verify_rejects_non_zip_payload() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ArchiveDownloader::new(settings(dir.path())).unwrap();

        let bogus = dir.path().join("bogus.zip");
        std::fs::write(&bogus, b"<html>maintenance page</html>").unwrap();

        let err = downloader.verify("bogus.zip", &bogus, 29).unwrap_err();
        assert!(matches!(err, DownloadError::Integrity { .. }));
    }

    #[test]
    fn verify_accepts_real_zip() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ArchiveDownloader::new(settings(dir.path())).unwrap();

        let path = dir.path().join("ok.zip");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file(
                "COTAHIST_D18032025.TXT",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
        writer.write_all(b"payload").unwrap();
        writer.finish().unwrap();

        let bytes = std::fs::metadata(&path).unwrap().len();
        assert_eq!(downloader.verify("ok.zip", &path, bytes).unwrap(), 1);
    }

    #[test]
    fn backoff_schedule_is_exponential() {
        let cfg = DownloaderSettings::default();
        let delays: Vec<f64> = (1..=3).map(|a| cfg.backoff_factor.powi(a)).collect();
        assert_eq!(delays, vec![2.0, 4.0, 8.0]);
    }
}
