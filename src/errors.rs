//! Error types for qsense

use thiserror::Error;

/// Main error type for qsense
#[derive(Error, Debug)]
pub enum QsenseError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Too many redirects (max {0})")]
    TooManyRedirects(u32),

    #[error("SSL error: {0}")]
    Ssl(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Server version mismatch: API {required} > server {server}")]
    Version {
        required: semver::Version,
        server: semver::Version,
    },
}

pub type Result<T> = std::result::Result<T, QsenseError>;
