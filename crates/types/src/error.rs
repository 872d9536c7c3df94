//! Unified error type for the copilot-relay workspace.

use thiserror::Error;

/// Enumerates all error kinds that can occur across relay crates.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Ill-formed inbound request body.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No credential could be resolved for the request.
    #[error("no usable credential available")]
    MissingCredentials,

    /// Device-flow or token-exchange failure.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The upstream API returned a non-success status.
    #[error("upstream error: status={status}, body={body}")]
    Upstream { status: u16, body: String },

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(String),

    /// Upstream returned 2xx but the body was not valid JSON.
    #[error("parse error: {0}")]
    Parse(String),

    /// The caller cancelled the request before it completed.
    #[error("request cancelled")]
    Cancelled,

    /// Model catalog refresh failure.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// On-disk state read or write failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Whether the error is a transient upstream condition worth retrying.
    ///
    /// Covers 429, 408, 425, any 5xx, and transport-level failures. A 401 is
    /// never retryable here: credential rotation is the dispatcher's job.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { status, .. } => {
                matches!(status, 429 | 408 | 425) || *status >= 500
            }
            Self::Http(_) => true,
            _ => false,
        }
    }
}

#[cfg(feature = "rquest")]
impl From<rquest::Error> for RelayError {
    fn from(e: rquest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RelayError>;
