//! Error types for the Veeam AHV exporter.
//!
//! Every error raised while serving a scrape is scoped to that request. Only
//! startup failures (configuration, listener binding) end the process.

use thiserror::Error;

/// Main error type for exporter operations.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Transport error talking to the proxy API (DNS, connect, TLS, timeout)
    #[error("Proxy API error: {0}")]
    Api(#[from] reqwest::Error),

    /// The proxy API answered with a status >= 400
    #[error("Proxy API returned {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Error parsing a proxy API response
    #[error("Failed to parse proxy API response: {0}")]
    ParseError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Requested profile section does not exist
    #[error("Section '{0}' not found in configuration")]
    UnknownProfile(String),

    /// Metrics error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// HTTP server error
    #[error("HTTP server error: {0}")]
    Server(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<prometheus::Error> for ExporterError {
    fn from(e: prometheus::Error) -> Self {
        ExporterError::Metrics(e.to_string())
    }
}

/// Result type alias for exporter operations.
pub type Result<T> = std::result::Result<T, ExporterError>;
