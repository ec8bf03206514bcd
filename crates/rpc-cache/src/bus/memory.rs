//! In-process invalidation bus on a tokio broadcast channel.

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::{InvalidationBus, Notification, NotificationStream};
use crate::error::BusError;

/// Default buffer size for the broadcast channel.
/// Slow listeners beyond this limit skip the oldest notifications.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Bus for a single process, used when Redis is disabled and in tests.
///
/// Subscribing registers a receiver synchronously, so the subscription is
/// acknowledged as soon as `subscribe` returns. [`close`](Self::close) ends
/// every open stream.
pub struct MemoryBus {
    sender: RwLock<Option<broadcast::Sender<Notification>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    /// Shut the bus down; open streams end and further calls fail.
    pub fn close(&self) {
        if self.sender.write().take().is_some() {
            tracing::debug!("in-process invalidation bus closed");
        }
    }

    /// Number of open streams across all channels.
    pub fn subscriber_count(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map_or(0, |sender| sender.receiver_count())
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus")
            .field("closed", &self.is_closed())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[async_trait]
impl InvalidationBus for MemoryBus {
    async fn subscribe(&self, channel: &str) -> Result<NotificationStream, BusError> {
        let receiver = self
            .sender
            .read()
            .as_ref()
            .map(|sender| sender.subscribe())
            .ok_or_else(|| BusError::subscribe(channel, "bus closed"))?;

        let channel = channel.to_string();
        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let channel = channel.clone();
            async move {
                match item {
                    Ok(notification) if notification.channel == channel => Some(notification),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(channel = %channel, skipped, "invalidation listener lagged");
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or(BusError::Closed)?;
        // No open stream is not an error
        let receivers = sender
            .send(Notification::new(channel, payload))
            .unwrap_or_default();
        tracing::debug!(channel = %channel, receivers, "published invalidation");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_delivers_only_subscribed_channel() {
        let bus = MemoryBus::new();
        let mut markets = bus.subscribe("markets:invalidated").await.unwrap();

        bus.publish("tickers:invalidated", "tickers:list").await.unwrap();
        bus.publish("markets:invalidated", "markets:list").await.unwrap();

        let received = timeout(Duration::from_secs(1), markets.next())
            .await
            .expect("notification")
            .unwrap();
        assert_eq!(
            received,
            Notification::new("markets:invalidated", "markets:list")
        );
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = MemoryBus::new();
        assert!(bus.publish("markets:invalidated", "markets:list").await.is_ok());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let bus = MemoryBus::new();
        let mut stream = bus.subscribe("markets:invalidated").await.unwrap();
        assert_eq!(bus.subscriber_count(), 1);

        bus.close();
        assert!(bus.is_closed());

        let next = timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream should end");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_closed_bus_rejects_calls() {
        let bus = MemoryBus::new();
        bus.close();

        let err = bus.subscribe("markets:invalidated").await.err().unwrap();
        assert!(matches!(err, BusError::Subscribe { ref channel, .. } if channel == "markets:invalidated"));
        assert!(matches!(
            bus.publish("markets:invalidated", "markets:list").await,
            Err(BusError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_lagged_listener_keeps_receiving() {
        let bus = MemoryBus::with_capacity(2);
        let mut stream = bus.subscribe("ch").await.unwrap();

        for i in 0..5 {
            bus.publish("ch", &format!("key-{i}")).await.unwrap();
        }

        let first = timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.payload, "key-3");
    }
}
