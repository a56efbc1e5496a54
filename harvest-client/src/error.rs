//! Error types for the completion service

use thiserror::Error;

/// Result type alias for completion service operations
pub type Result<T> = std::result::Result<T, CompletionError>;

/// Errors that can occur while submitting work or collecting results
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Workers could not be started; the session was not created
    #[error("Worker provisioning failed: {0}")]
    Provisioning(String),

    /// Call arguments could not be encoded
    #[error("Failed to serialize arguments: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The queue transport rejected an operation
    #[error("Queue transport error: {0}")]
    Transport(String),

    /// A finished experiment's result could not be read or decoded
    #[error("Failed to read result of experiment {key}: {message}")]
    Retrieval {
        /// Experiment key
        key: String,
        /// What went wrong
        message: String,
    },

    /// The experiment directory failed
    #[error("Experiment directory error: {0}")]
    Directory(String),

    /// Experiment or artifact not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid or unsupported configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Gateway returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the gateway
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompletionError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn retrieval(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Retrieval {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::ApiError { status: 404, .. })
    }
}
