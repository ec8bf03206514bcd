//! Per-call context passed through the interceptor chain.

use std::time::{Duration, Instant};

/// Metadata describing one unary call.
///
/// `method` is the full method identifier the framework reports for the call
/// (for gRPC this is `/package.Service/Method`). `deadline` is the caller's
/// deadline; the chain enforces it around the whole call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub method: String,
    pub deadline: Option<Instant>,
}

impl CallContext {
    /// Create a context for `method` without a deadline.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Time left until the deadline, `None` if the call has no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }
}
