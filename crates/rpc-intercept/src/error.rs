//! Errors surfaced to the caller of an intercepted call.

/// Error returned by a unary call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The underlying call failed.
    #[error("{method} failed: {message}")]
    Failed { method: String, message: String },

    /// The caller's deadline elapsed before the call completed.
    #[error("deadline exceeded for {0}")]
    DeadlineExceeded(String),

    /// Internal failure inside the call path (e.g. a recovered panic).
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CallError {
    pub fn failed(method: impl Into<String>, message: impl Into<String>) -> Self {
        CallError::Failed {
            method: method.into(),
            message: message.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CallError::Internal(msg.into())
    }
}

/// Result type for intercepted calls.
pub type Result<T> = std::result::Result<T, CallError>;
