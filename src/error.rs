//! Error taxonomy for the workflow client.
//!
//! Every failure the library can produce is one of a small, closed set of
//! variants so the boundary layer can map it to a response without looking
//! at message text.

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the workflow client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The requested resource does not exist (or no longer exists)
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// The control plane or engine could not be reached
    #[error("Control plane unavailable: {0}")]
    Unavailable(String),

    /// The request itself is malformed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unexpected failure inside the client
    #[error("Internal error: {0}")]
    Internal(String),

    /// The caller abandoned the operation
    #[error("Operation cancelled")]
    Cancelled,
}

impl ClientError {
    /// Shorthand for a `NotFound` error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Machine-readable error code
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Internal(_) => "INTERNAL",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// HTTP status the boundary layer should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::InvalidInput(_) => 400,
            Self::Unavailable(_) | Self::Cancelled => 503,
            Self::Internal(_) => 500,
        }
    }

    /// Whether the caller may reasonably try the same call again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Unavailable(format!("request timed out: {}", err))
        } else if err.is_decode() {
            Self::Internal(format!("failed to decode response: {}", err))
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("malformed JSON: {}", err))
    }
}
