//! SSL/TLS configuration for HTTPS connections
//!
//! Qlik Sense servers authenticate API clients with an exported certificate
//! pair. By convention the export produces `<base>.pem` and `<base>_key.pem`;
//! [`CertificatePair::from_convention`] expands a single base path into both.
//!
//! Certificate verification can be disabled for sites running the default
//! self-signed server certificates.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::errors::{QsenseError, Result};

/// Client certificate pair presented at the TLS layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePair {
    /// Path to the PEM certificate file
    pub cert_file: PathBuf,
    /// Path to the matching PEM private key file
    pub key_file: PathBuf,
}

impl CertificatePair {
    pub fn new(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        }
    }

    /// Expand a single path per the vendor convention: `client.pem` implies
    /// the key file `client_key.pem` next to it.
    pub fn from_convention(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        let key_file = match base.extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let stem = base.with_extension("");
                PathBuf::from(format!("{}_key.{}", stem.display(), ext))
            }
            None => PathBuf::from(format!("{}_key", base.display())),
        };
        Self {
            cert_file: base.to_path_buf(),
            key_file,
        }
    }

    /// Load the pair as a reqwest identity. Cert and key are concatenated
    /// into one PEM bundle, which is the form rustls accepts.
    pub fn load_identity(&self) -> Result<reqwest::Identity> {
        let mut combined = fs::read(&self.cert_file).map_err(|e| {
            QsenseError::Ssl(format!(
                "Failed to read certificate '{}': {}",
                self.cert_file.display(),
                e
            ))
        })?;
        let key = fs::read(&self.key_file).map_err(|e| {
            QsenseError::Ssl(format!(
                "Failed to read key file '{}': {}",
                self.key_file.display(),
                e
            ))
        })?;
        combined.push(b'\n');
        combined.extend_from_slice(&key);

        reqwest::Identity::from_pem(&combined)
            .map_err(|e| QsenseError::Ssl(format!("Failed to load PEM identity: {}", e)))
    }
}

/// TLS trust settings applied when building the HTTP client.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Whether to verify server certificates
    pub verify: bool,
    /// Custom CA bundle path
    pub ca_bundle: Option<PathBuf>,
    /// Client certificate pair
    pub client_cert: Option<CertificatePair>,
}

impl TlsConfig {
    /// Apply the TLS settings to a reqwest ClientBuilder.
    pub fn apply_to_builder(
        &self,
        mut builder: reqwest::blocking::ClientBuilder,
    ) -> Result<reqwest::blocking::ClientBuilder> {
        if !self.verify {
            warn!("server certificate verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ca_path) = &self.ca_bundle {
            for cert in load_ca_bundle(ca_path)? {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some(pair) = &self.client_cert {
            builder = builder.identity(pair.load_identity()?);
        }

        Ok(builder)
    }
}

/// Load one or more CA certificates from a PEM bundle file.
fn load_ca_bundle(path: &Path) -> Result<Vec<reqwest::Certificate>> {
    let ca_data = fs::read(path).map_err(|e| {
        QsenseError::Ssl(format!("Failed to read CA bundle '{}': {}", path.display(), e))
    })?;

    let mut certs = Vec::new();
    let mut reader = std::io::BufReader::new(ca_data.as_slice());

    for cert_result in rustls_pemfile::certs(&mut reader) {
        let cert = cert_result
            .map_err(|e| QsenseError::Ssl(format!("Failed to parse CA bundle: {}", e)))?;
        let reqwest_cert = reqwest::Certificate::from_der(&cert)
            .map_err(|e| QsenseError::Ssl(format!("Failed to parse CA certificate: {}", e)))?;
        certs.push(reqwest_cert);
    }

    if certs.is_empty() {
        let cert = reqwest::Certificate::from_pem(&ca_data)
            .map_err(|e| QsenseError::Ssl(format!("Failed to parse CA bundle as PEM: {}", e)))?;
        certs.push(cert);
    }

    Ok(certs)
}
