//! Error types for breeze-core

use std::time::Duration;
use thiserror::Error;

/// Result type alias for breeze operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the dispatch bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid HTTP method
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Inbound payload could not be decoded
    #[error("Invalid request JSON: {0}")]
    InvalidPayload(String),

    /// Raised by user handler or middleware code (`next(err)`)
    #[error("{0}")]
    Handler(String),

    /// Pending operation deadline elapsed
    #[error("Request timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Request cancellation token fired
    #[error("Request aborted")]
    Aborted,

    /// User code panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// Deferred work needs a tokio runtime
    #[error("No async runtime available to run pending operation")]
    NoRuntime,

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Error raised from user code, the equivalent of `next(new Error(msg))`
    pub fn handler(message: impl Into<String>) -> Self {
        Error::Handler(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Render a panic payload caught by `catch_unwind` or a join handle
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Error::Panicked(message)
    }
}
