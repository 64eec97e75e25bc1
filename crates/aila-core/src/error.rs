//! Error types for the core library.

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A configuration-related error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A path resolution or validation error.
    #[error("path error: {0}")]
    Path(String),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A transient network failure that survived every retry.
    #[error("network error: {0}")]
    Network(String),

    /// The login flow never reached the landing page, or reached it with a bad status.
    #[error("authentication failed after {attempts} attempts (last status: {})", display_status(.status))]
    AuthenticationFailed {
        /// Number of login iterations that ran.
        attempts: u32,
        /// HTTP status of the last response, if any response arrived.
        status: Option<u16>,
    },

    /// A portal response was missing an expected JSON substructure.
    #[error("unexpected response shape from {method}: missing {path}")]
    UnexpectedShape {
        /// Remote procedure that produced the response.
        method: String,
        /// Dotted path of the missing substructure.
        path: String,
    },

    /// An API or HTTP error.
    #[error("API error: {0}")]
    Api(String),

    /// The language model backend failed.
    #[error("model error: {0}")]
    Model(String),

    /// A generic error for other cases.
    #[error("error: {0}")]
    Other(String),
}

impl CoreError {
    /// Build an [`CoreError::UnexpectedShape`] for a remote method and JSON path.
    #[must_use]
    pub fn shape(method: &str, path: &str) -> Self {
        Self::UnexpectedShape {
            method: method.to_string(),
            path: path.to_string(),
        }
    }
}

fn display_status(status: &Option<u16>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;
