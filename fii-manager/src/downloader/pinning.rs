//! Certificate pinning for the archive host.
//!
//! On the first successful probe of a host the SHA-256 fingerprint of the
//! server's leaf certificate is persisted. Later probes compare against
//! the stored pin: a mismatch is logged to the security channel and
//! appended to a history file, and only aborts the download when
//! configured strict. A changed pin older than the rotation window is
//! accepted as a planned renewal.
//!
//! The probe performs its own TLS handshake (verification disabled for
//! the probe only) because the HTTP client does not expose peer
//! certificates. The actual download still goes through the normally
//! verified HTTPS stack.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tracing::{info, warn};

use fii_common::logging::channel;

use super::client::DownloadError;

const PINS_FILE: &str = "pins.json";
const HISTORY_FILE: &str = "pin_history.csv";

/// Outcome of comparing a probed fingerprint against the stored pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinVerdict {
    /// First contact; the fingerprint was pinned
    FirstPin,
    /// Fingerprint matches the stored pin
    Match,
    /// Fingerprint changed but the old pin is past the rotation window
    Rotated,
    /// Fingerprint changed inside the rotation window
    Mismatch { expected: String, actual: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPin {
    fingerprint: String,
    pinned_at: DateTime<Utc>,
}

/// Per-host pin store backed by a JSON file.
#[derive(Debug)]
pub struct CertificatePinner {
    cert_dir: PathBuf,
    rotation_days: i64,
    pins: HashMap<String, StoredPin>,
}

impl CertificatePinner {
    /// Load the pin store from `cert_dir`, creating the directory if
    /// needed.
    pub fn load(cert_dir: PathBuf, rotation_days: i64) -> Result<Self, DownloadError> {
        std::fs::create_dir_all(&cert_dir)?;
        let pins_path = cert_dir.join(PINS_FILE);
        let pins = if pins_path.exists() {
            let text = std::fs::read_to_string(&pins_path)?;
            serde_json::from_str(&text).unwrap_or_else(|err| {
                warn!(target: channel::SECURITY, "pin store unreadable, starting fresh: {}", err);
                HashMap::new()
            })
        } else {
            HashMap::new()
        };
        Ok(Self {
            cert_dir,
            rotation_days,
            pins,
        })
    }

    /// Probe `host` and evaluate its certificate against the stored pin.
    /// Every observed fingerprint is appended to the history file.
    pub async fn check_host(&mut self, host: &str) -> Result<PinVerdict, DownloadError> {
        let fingerprint = probe_fingerprint(host).await?;
        self.append_history(host, &fingerprint)?;

        let verdict = match self.pins.get(host) {
            None => {
                self.store_pin(host, &fingerprint)?;
                info!(target: channel::SECURITY, "pinned {} -> {}", host, fingerprint);
                PinVerdict::FirstPin
            }
            Some(pin) if pin.fingerprint == fingerprint => PinVerdict::Match,
            Some(pin) => {
                let age_days = (Utc::now() - pin.pinned_at).num_days();
                if age_days >= self.rotation_days {
                    info!(
                        target: channel::SECURITY,
                        "accepting rotated certificate for {} (previous pin was {} days old)",
                        host,
                        age_days
                    );
                    self.store_pin(host, &fingerprint)?;
                    PinVerdict::Rotated
                } else {
                    warn!(
                        target: channel::SECURITY,
                        "certificate fingerprint changed for {}: expected {}, got {}",
                        host,
                        pin.fingerprint,
                        fingerprint
                    );
                    PinVerdict::Mismatch {
                        expected: pin.fingerprint.clone(),
                        actual: fingerprint,
                    }
                }
            }
        };
        Ok(verdict)
    }

    fn store_pin(&mut self, host: &str, fingerprint: &str) -> Result<(), DownloadError> {
        self.pins.insert(
            host.to_string(),
            StoredPin {
                fingerprint: fingerprint.to_string(),
                pinned_at: Utc::now(),
            },
        );
        let text = serde_json::to_string_pretty(&self.pins)
            .expect("pin map serialization cannot fail");
        std::fs::write(self.cert_dir.join(PINS_FILE), text)?;
        Ok(())
    }

    fn append_history(&self, host: &str, fingerprint: &str) -> Result<(), DownloadError> {
        let path = self.cert_dir.join(HISTORY_FILE);
        let new = !path.exists();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        if new {
            writeln!(file, "timestamp,host,fingerprint")?;
        }
        writeln!(
            file,
            "{},{},{}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            host,
            fingerprint
        )?;
        Ok(())
    }
}

/// TLS-handshake `host:443` and return the SHA-256 hex fingerprint of the
/// leaf certificate.
async fn probe_fingerprint(host: &str) -> Result<String, DownloadError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DownloadError::Probe(format!("tls config: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| DownloadError::Probe(format!("invalid host '{}': {}", host, e)))?;

    let stream = TcpStream::connect((host, 443u16))
        .await
        .map_err(|e| DownloadError::Probe(format!("connect {}: {}", host, e)))?;
    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| DownloadError::Probe(format!("handshake {}: {}", host, e)))?;

    let (_, conn) = tls.get_ref();
    let leaf = conn
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or_else(|| DownloadError::Probe(format!("no certificate presented by {}", host)))?;

    Ok(hex_digest(leaf.as_ref()))
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Verifier used only by the fingerprint probe. The probe wants to *see*
/// the certificate, not trust it; the download itself uses the normal
/// verified client.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprints_are_lowercase_hex() {
        let fp = hex_digest(b"certificate bytes");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, hex_digest(b"certificate bytes"));
        assert_ne!(fp, hex_digest(b"other bytes"));
    }

    #[test]
    fn pin_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut pinner = CertificatePinner::load(dir.path().to_path_buf(), 7).unwrap();
        pinner.store_pin("example.com", "abc123").unwrap();

        let reloaded = CertificatePinner::load(dir.path().to_path_buf(), 7).unwrap();
        assert_eq!(reloaded.pins["example.com"].fingerprint, "abc123");
    }

    #[test]
    fn history_file_gets_a_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let pinner = CertificatePinner::load(dir.path().to_path_buf(), 7).unwrap();
        pinner.append_history("example.com", "abc").unwrap();
        pinner.append_history("example.com", "def").unwrap();

        let text = std::fs::read_to_string(dir.path().join(HISTORY_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,host,fingerprint");
        assert!(lines[2].ends_with(",def"));
    }
}
