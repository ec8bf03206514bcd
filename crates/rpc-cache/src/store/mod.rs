//! Cache store façade.
//!
//! A [`CacheStore`] is a concurrency-safe key/value service with TTL and byte
//! values. Two back ends are provided:
//!
//! - [`RedisStore`]: shared across instances, budget read from `maxmemory`
//! - [`MemoryStore`]: per-instance DashMap, used when Redis is disabled or
//!   unreachable and in tests
//!
//! Every `set` runs [`ensure_within_budget`] before touching the store, so an
//! oversized payload is rejected rather than truncated.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub(crate) use self::redis::create_pool;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RedisConfig;
use crate::error::StoreError;

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the bytes stored under `key`; `Ok(None)` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key` for `ttl`.
    ///
    /// Fails with [`StoreError::CapacityExceeded`] without a round trip when
    /// the payload is larger than [`memory_budget`](Self::memory_budget).
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Byte ceiling of the store, 0 when unknown or unbounded.
    fn memory_budget(&self) -> u64;

    /// Back end name for logs.
    fn name(&self) -> &'static str;
}

/// Local capacity pre-check shared by every store. A budget of 0 disables it.
pub fn ensure_within_budget(size: usize, budget: u64) -> Result<(), StoreError> {
    if budget > 0 && size as u64 > budget {
        return Err(StoreError::CapacityExceeded { size, budget });
    }
    Ok(())
}

/// Create the cache store described by `config`.
///
/// - **Redis disabled**: in-memory store
/// - **Redis enabled**: Redis store, falling back to in-memory when the
///   connection cannot be established so the service still starts
pub async fn connect_store(config: &RedisConfig) -> Arc<dyn CacheStore> {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-memory cache store");
        return Arc::new(MemoryStore::new());
    }

    match RedisStore::connect(config).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(
                url = %config.url,
                error = %e,
                "Failed to connect to Redis. Falling back to in-memory cache store."
            );
            Arc::new(MemoryStore::new())
        }
    }
}
