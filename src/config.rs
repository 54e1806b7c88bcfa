//! Driver configuration
//!
//! All connection state is gathered into one immutable [`Config`] passed to
//! driver construction; nothing is read from globals or mutable defaults.

use std::path::{Path, PathBuf};

use crate::errors::{QsenseError, Result};
use crate::identity::Identity;
use crate::tls::{CertificatePair, TlsConfig};
use crate::vproxy::VirtualProxy;

/// Default streaming block size for uploads and downloads (512 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// Default ceiling on authentication-handshake redirect hops.
pub const DEFAULT_MAX_REDIRECTS: u32 = 30;

/// Connection settings for a [`RequestDriver`](crate::RequestDriver).
#[derive(Debug, Clone)]
pub struct Config {
    /// URL scheme, `http` or `https`
    pub scheme: String,
    /// Server hostname
    pub host: String,
    /// Service port (QRS defaults to 4242, QPS to 4243)
    pub port: u16,
    /// Optional virtual-proxy rewrite rule
    pub vproxy: Option<VirtualProxy>,
    /// Client certificate pair; when absent and the identity carries a
    /// password, NTLM authentication is used instead
    pub certificate: Option<CertificatePair>,
    /// Whether to verify server certificates
    pub verify: bool,
    /// Custom CA bundle for sites with a private root
    pub ca_bundle: Option<PathBuf>,
    /// Impersonated user
    pub user: Identity,
    /// Streaming transfer block size in bytes
    pub chunk_size: usize,
    /// Redirect hop ceiling for the authentication handshake
    pub max_redirects: u32,
}

impl Config {
    /// Settings for `host` with the library defaults: HTTPS on port 4242,
    /// no certificate, verification off (Sense sites commonly run the
    /// self-signed server certificates installed by setup).
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            scheme: "https".to_string(),
            host: host.into(),
            port: 4242,
            vproxy: None,
            certificate: None,
            verify: false,
            ca_bundle: None,
            user: Identity::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn virtual_proxy(mut self, vproxy: VirtualProxy) -> Self {
        self.vproxy = Some(vproxy);
        self
    }

    pub fn certificate(mut self, pair: CertificatePair) -> Self {
        self.certificate = Some(pair);
        self
    }

    /// Set the certificate from a single base path, expanding the key file
    /// path by convention (`client.pem` implies `client_key.pem`).
    pub fn certificate_base(self, base: impl AsRef<Path>) -> Self {
        self.certificate(CertificatePair::from_convention(base))
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn ca_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_bundle = Some(path.into());
        self
    }

    pub fn user(mut self, user: Identity) -> Self {
        self.user = user;
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }

    /// The base URL all API paths are joined onto.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub(crate) fn tls(&self) -> TlsConfig {
        TlsConfig {
            verify: self.verify,
            ca_bundle: self.ca_bundle.clone(),
            client_cert: self.certificate.clone(),
        }
    }

    /// Split combined user input into clean (scheme, host, port) fields.
    ///
    /// - a host of the form `scheme://rest` overrides the scheme;
    /// - without a client certificate the port falls back to 443, the
    ///   virtual-proxy HTTPS port (certificate auth talks to the service
    ///   ports directly);
    /// - a host of the form `name:port` overrides the port.
    pub fn normalize(
        scheme: &str,
        host: &str,
        port: u16,
        certificate: Option<&CertificatePair>,
    ) -> Result<(String, String, u16)> {
        let mut scheme = scheme.to_string();
        let mut host = host.to_string();
        let mut port = port;

        if let Some((s, h)) = host.split_once("://") {
            scheme = s.to_string();
            host = h.to_string();
        }
        if certificate.is_none() {
            port = 443;
        }
        if let Some((h, p)) = host.split_once(':') {
            port = p
                .parse()
                .map_err(|_| QsenseError::Argument(format!("invalid port in host '{host}'")))?;
            host = h.to_string();
        }

        Ok((scheme, host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_embedded_port() {
        let (scheme, host, port) = Config::normalize("https", "host:8080", 4242, None).unwrap();
        assert_eq!(scheme, "https");
        assert_eq!(host, "host");
        assert_eq!(port, 8080);
    }

    #[test]
    fn test_normalize_embedded_scheme_defaults_port() {
        let (scheme, host, port) = Config::normalize("https", "https://host", 4242, None).unwrap();
        assert_eq!(scheme, "https");
        assert_eq!(host, "host");
        assert_eq!(port, 443);
    }

    #[test]
    fn test_normalize_keeps_port_with_certificate() {
        let pair = CertificatePair::from_convention("client.pem");
        let (_, host, port) = Config::normalize("https", "host", 4242, Some(&pair)).unwrap();
        assert_eq!(host, "host");
        assert_eq!(port, 4242);
    }

    #[test]
    fn test_normalize_scheme_and_port_combined() {
        let (scheme, host, port) =
            Config::normalize("https", "http://host:8443", 4242, None).unwrap();
        assert_eq!(scheme, "http");
        assert_eq!(host, "host");
        assert_eq!(port, 8443);
    }

    #[test]
    fn test_normalize_bad_port() {
        assert!(Config::normalize("https", "host:notaport", 4242, None).is_err());
    }

    #[test]
    fn test_base_url() {
        let config = Config::new("sense.example.com").port(4242);
        assert_eq!(config.base_url(), "https://sense.example.com:4242");
    }
}
