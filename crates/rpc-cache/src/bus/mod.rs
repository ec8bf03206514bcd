//! Invalidation bus façade.
//!
//! The bus delivers `{channel, payload}` notifications published by other
//! services. [`InvalidationBus::subscribe`] only returns once the broker has
//! acknowledged the subscription, so nothing published afterwards is missed.
//!
//! ## Example Flow
//!
//! ```text
//! Producer: PUBLISH markets:invalidated "markets:list"
//!   ↓
//! Bus: delivers {channel: "markets:invalidated", payload: "markets:list"}
//!   ↓
//! Listener: payload == cache key → DEL markets:list
//! ```

mod memory;
mod redis;

pub use self::memory::MemoryBus;
pub use self::redis::RedisBus;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::config::RedisConfig;
use crate::error::BusError;

/// A message delivered on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

impl Notification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Unbounded sequence of notifications for one subscription. It ends only
/// when the bus shuts down.
pub type NotificationStream = BoxStream<'static, Notification>;

#[async_trait]
pub trait InvalidationBus: Send + Sync {
    /// Subscribe to `channel`, waiting for the broker's acknowledgement.
    async fn subscribe(&self, channel: &str) -> Result<NotificationStream, BusError>;

    /// Publish `payload` on `channel` (producer side).
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError>;

    /// Whether the bus was shut down on purpose. A stream that ends while
    /// this is false was lost and can be subscribed again.
    fn is_closed(&self) -> bool {
        false
    }

    /// Back end name for logs.
    fn name(&self) -> &'static str;
}

/// Create the invalidation bus described by `config`.
///
/// Unlike the store there is no silent fallback when Redis is enabled: a bus
/// that cannot reach the broker must fail subscription setup.
pub fn connect_bus(config: &RedisConfig) -> Result<Arc<dyn InvalidationBus>, BusError> {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-process invalidation bus");
        return Ok(Arc::new(MemoryBus::new()));
    }
    Ok(Arc::new(RedisBus::connect(config)?))
}
