//! Redis Pub/Sub invalidation bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ::redis::AsyncCommands;
use async_trait::async_trait;
use deadpool_redis::Pool;
use futures_util::StreamExt;

use super::{InvalidationBus, Notification, NotificationStream};
use crate::config::RedisConfig;
use crate::error::BusError;
use crate::store::create_pool;

/// Bus backed by Redis `SUBSCRIBE`/`PUBLISH`.
///
/// Every subscription opens its own pub/sub connection, so a listener never
/// competes with cache traffic for a pooled connection. Publishing goes
/// through the pool. A stream ends when its connection drops; listeners
/// then subscribe again. [`close`](Self::close) refuses new subscriptions so
/// they stop instead.
#[derive(Clone)]
pub struct RedisBus {
    client: ::redis::Client,
    pool: Pool,
    timeout: Duration,
    closed: Arc<AtomicBool>,
}

impl RedisBus {
    pub fn connect(config: &RedisConfig) -> Result<Self, BusError> {
        let client = ::redis::Client::open(config.url.as_str())
            .map_err(|e| BusError::Connect(format!("failed to create Redis client: {e}")))?;
        let pool = create_pool(config).map_err(BusError::Connect)?;
        Ok(Self {
            client,
            pool,
            timeout: config.timeout(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[async_trait]
impl InvalidationBus for RedisBus {
    async fn subscribe(&self, channel: &str) -> Result<NotificationStream, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let subscribe = async {
            let mut pubsub = self
                .client
                .get_async_pubsub()
                .await
                .map_err(|e| BusError::subscribe(channel, format!("failed to get pub/sub connection: {e}")))?;
            // Resolves once Redis has acknowledged the SUBSCRIBE
            pubsub
                .subscribe(channel)
                .await
                .map_err(|e| BusError::subscribe(channel, e))?;
            Ok::<_, BusError>(pubsub)
        };
        let pubsub = tokio::time::timeout(self.timeout, subscribe)
            .await
            .map_err(|_| BusError::subscribe(channel, "timed out waiting for acknowledgement"))??;

        tracing::info!(channel = %channel, "Subscribed to invalidation channel");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(Notification::new(msg.get_channel_name(), payload)),
                Err(e) => {
                    tracing::warn!(
                        channel = %msg.get_channel_name(),
                        error = %e,
                        "failed to parse invalidation message payload"
                    );
                    None
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| BusError::publish(channel, format!("failed to get Redis connection: {e}")))?;

        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| BusError::publish(channel, e))?;

        tracing::debug!(channel = %channel, "published cache invalidation");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_fails_to_connect() {
        let config = RedisConfig {
            enabled: true,
            url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(RedisBus::connect(&config), Err(BusError::Connect(_))));
    }

    #[tokio::test]
    async fn test_connect_is_lazy() {
        let config = RedisConfig {
            enabled: true,
            url: "redis://127.0.0.1:1".to_string(),
            timeout_ms: 200,
            ..Default::default()
        };
        let bus = RedisBus::connect(&config).unwrap();
        assert_eq!(bus.name(), "redis");

        let err = bus.subscribe("markets:invalidated").await.err().unwrap();
        assert!(matches!(err, BusError::Subscribe { .. }));
        assert!(!bus.is_closed());

        bus.close();
        let err = bus.subscribe("markets:invalidated").await.err().unwrap();
        assert!(matches!(err, BusError::Closed));
        assert!(matches!(
            bus.publish("markets:invalidated", "markets:list").await,
            Err(BusError::Closed)
        ));
    }
}
