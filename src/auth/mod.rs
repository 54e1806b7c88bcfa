//! HTTP-layer authentication
//!
//! When no client certificate is configured and the impersonated identity
//! carries a password, the driver authenticates against the proxy with NTLM.

mod ntlm;

pub use ntlm::{challenge_from_headers, NtlmAuth, Type2Message};

use thiserror::Error;

/// Authentication failures, wrapped into
/// [`QsenseError::Auth`](crate::QsenseError::Auth) by the driver.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid header value: {0}")]
    InvalidHeader(String),

    #[error("invalid NTLM challenge: {0}")]
    InvalidChallenge(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}
