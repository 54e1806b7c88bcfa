//! Qlik Sense QPS/QRS REST API client
//!
//! This crate talks to the two REST services of a Qlik Sense Enterprise
//! site: the Proxy Service (QPS, sessions and tickets) and the Repository
//! Service (QRS, apps, streams, users, tasks).
//!
//! Everything runs through one [`RequestDriver`], which owns the HTTPS
//! session and implements the vendor's request conventions: a per-call
//! anti-CSRF token mirrored between query string and header, an
//! `X-Qlik-User` impersonation header on every request, optional
//! virtual-proxy path rewriting, and manual handling of the proxy's
//! redirect-based authentication handshake. Transport authentication is
//! either a client certificate pair or NTLM, mutually exclusive.
//!
//! # Module Organization
//!
//! - [`errors`] - Error types (QsenseError, Result)
//! - [`config`] - Immutable connection configuration
//! - [`identity`] - Impersonated user identity
//! - [`vproxy`] - Virtual-proxy path rewriting
//! - [`tls`] - Trust settings and client-certificate material
//! - [`auth`] - NTLM challenge-response authentication
//! - [`driver`] - Request execution core (call/download/upload)
//! - [`qps`] / [`qrs`] - Thin per-service API surfaces
//!
//! # Example
//!
//! ```no_run
//! use qsense::{Config, Qrs};
//!
//! fn main() -> qsense::Result<()> {
//!     let config = Config::new("sense.example.com")
//!         .certificate_base("certs/client.pem")
//!         .port(4242);
//!     let qrs = Qrs::connect(config)?;
//!     println!("apps: {}", qrs.count("app", None)?);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod driver;
pub mod errors;
pub mod identity;
pub mod qps;
pub mod qrs;
pub mod tls;
pub mod vproxy;

// Re-exports
pub use config::Config;
pub use driver::{
    Attachment, Outcome, ParamValue, Params, RequestBody, RequestDriver, APP_CONTENT_TYPE,
    USER_AGENT_STRING,
};
pub use errors::{QsenseError, Result};
pub use identity::Identity;
pub use qps::Qps;
pub use qrs::{ExportApi, Qrs};
pub use tls::CertificatePair;
pub use vproxy::VirtualProxy;
