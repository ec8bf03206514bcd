//! Error types for the caching subsystem.
//!
//! Only [`BusError`] during subscription setup is ever surfaced to a caller;
//! store and codec failures are absorbed by the interceptor and reported to
//! its observer.

use crate::config::ConfigError;

/// Failure of a [`CacheStore`](crate::store::CacheStore) operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transport or backend failure.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    /// Encoded payload is larger than the store's memory budget.
    #[error("payload of {size} bytes exceeds memory budget of {budget} bytes")]
    CapacityExceeded { size: usize, budget: u64 },
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Failure of an [`InvalidationBus`](crate::bus::InvalidationBus) operation.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to connect to invalidation bus: {0}")]
    Connect(String),

    /// The broker did not acknowledge the subscription.
    #[error("failed to subscribe to {channel}: {reason}")]
    Subscribe { channel: String, reason: String },

    #[error("failed to publish to {channel}: {reason}")]
    Publish { channel: String, reason: String },

    #[error("invalidation bus closed")]
    Closed,
}

impl BusError {
    pub fn subscribe(channel: impl Into<String>, reason: impl ToString) -> Self {
        Self::Subscribe {
            channel: channel.into(),
            reason: reason.to_string(),
        }
    }

    pub fn publish(channel: impl Into<String>, reason: impl ToString) -> Self {
        Self::Publish {
            channel: channel.into(),
            reason: reason.to_string(),
        }
    }
}

/// Payload encoding failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),
}

/// Fatal setup error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for cache setup operations.
pub type Result<T> = std::result::Result<T, Error>;
