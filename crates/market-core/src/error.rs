use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid caller input, for example an update without any filter.
    Input,
    /// Authentication/authorization failure reported by the server.
    Auth,
    /// Transient transport failure (connect, DNS, per-attempt timeout).
    Transport,
    /// The server was reachable and answered with a non-success status.
    Api,
    /// A success response carried a body that could not be decoded.
    Deserialize,
    /// Internal client bug or invariant break.
    Internal,
}

/// Stable error payload surfaced by the resource client and the chat feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ClientError {
    /// High-level error category.
    pub category: ErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ClientError {
    /// Construct a new client error.
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// Only transport-level failures are retryable; a reachable server
    /// returning an application error is final.
    pub fn is_retryable(&self) -> bool {
        self.category == ErrorCategory::Transport
    }
}

/// Map a non-success HTTP status code to an error category.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Auth,
        400..=599 => ErrorCategory::Api,
        _ => ErrorCategory::Internal,
    }
}
