//! Error types for the resync engine.
//!
//! The engine itself never lets these escape as panics: transport failures are
//! recorded against queued requests, probe failures become negative
//! connectivity signals, and refused operations return empty results. The
//! error type exists for the seams where a caller does get a `Result` back
//! (transports, configuration loading and updates).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the resync engine.
#[derive(Debug, Error)]
pub enum ResyncError {
    // Transport errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Remote answered with HTTP {status}")]
    Http { status: u16 },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Engine has been disposed")]
    Disposed,

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for resync operations.
pub type Result<T> = std::result::Result<T, ResyncError>;

impl From<std::io::Error> for ResyncError {
    fn from(err: std::io::Error) -> Self {
        ResyncError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ResyncError {
    fn from(err: serde_json::Error) -> Self {
        ResyncError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ResyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ResyncError::Timeout(Duration::ZERO)
        } else if let Some(status) = err.status() {
            ResyncError::Http {
                status: status.as_u16(),
            }
        } else {
            ResyncError::Network {
                message: err.to_string(),
                cause: std::error::Error::source(&err).map(|s| s.to_string()),
            }
        }
    }
}

impl ResyncError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ResyncError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        ResyncError::Config {
            message: message.into(),
        }
    }

    /// Check if this error looks like a transient failure: a network error,
    /// a timeout, or an HTTP 5xx, 408 or 429 answer.
    ///
    /// Classification only. The drain pass counts every failed send against
    /// the request's retry budget whatever this returns.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResyncError::Network { .. } | ResyncError::Timeout(_) => true,
            ResyncError::Http { status } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }
}
