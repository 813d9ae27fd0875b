//! Error types for bingscraper
//!
//! Failures fall into two groups:
//! - Per-item failures ([`FetchError`]) that are logged and folded into a
//!   download outcome or an empty page. One bad URL never aborts a run.
//! - Run-fatal failures ([`PersistenceError`], configuration errors) that stop
//!   the run and produce a nonzero exit.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bingscraper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bingscraper
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "threads")
        key: Option<String>,
    },

    /// Tracker state could not be read or written
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be constructed
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Config file could not be parsed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Machine-readable error code, used as a structured log field
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Persistence(PersistenceError::Read { .. }) => "tracker_read_failed",
            Error::Persistence(PersistenceError::Write { .. }) => "tracker_write_failed",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
        }
    }
}

/// Network, timeout or HTTP failure reaching a page or image endpoint
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The request exceeded the configured timeout
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL being fetched
        url: String,
    },

    /// The connection could not be established
    #[error("connection failed for {url}: {reason}")]
    Connect {
        /// The URL being fetched
        url: String,
        /// Underlying client error
        reason: String,
    },

    /// The server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status {
        /// The URL being fetched
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The response body could not be read
    #[error("failed to read body from {url}: {reason}")]
    Body {
        /// The URL being fetched
        url: String,
        /// Underlying client error
        reason: String,
    },

    /// Any other request failure (invalid URL, redirect loop, ...)
    #[error("request to {url} failed: {reason}")]
    Request {
        /// The URL being fetched
        url: String,
        /// Underlying client error
        reason: String,
    },
}

impl FetchError {
    /// Classify a reqwest error raised while sending a request
    pub fn from_send(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if err.is_connect() {
            FetchError::Connect {
                url: url.to_string(),
                reason: err.to_string(),
            }
        } else {
            FetchError::Request {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }

    /// Classify a reqwest error raised while reading a response body
    pub fn from_body(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Body {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            FetchError::Timeout { .. } => "fetch_timeout",
            FetchError::Connect { .. } => "fetch_connect_failed",
            FetchError::Status { .. } => "fetch_http_status",
            FetchError::Body { .. } => "fetch_body_failed",
            FetchError::Request { .. } => "fetch_request_failed",
        }
    }
}

/// Tracker artifacts could not be read or written
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Reading an existing artifact failed (a missing artifact is not an error)
    #[error("failed to read {path}: {source}")]
    Read {
        /// The artifact path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Writing or replacing an artifact failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// The artifact path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}
