//! Redis cache store over a deadpool connection pool.

use std::collections::HashMap;
use std::time::Duration;

use ::redis::AsyncCommands;
use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};

use super::{CacheStore, ensure_within_budget};
use crate::config::RedisConfig;
use crate::error::StoreError;

/// Cache store shared across instances.
///
/// The memory budget is read once from `CONFIG GET maxmemory` when the store
/// connects and is not refreshed afterwards. Managed Redis deployments often
/// refuse `CONFIG`; the budget is then unknown (0) and the guard is disabled.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    memory_budget: u64,
}

impl RedisStore {
    /// Build a pool from `config`, verify a connection and read the budget.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        tracing::info!(url = %config.url, "Connecting to Redis cache store");

        let pool = create_pool(config).map_err(StoreError::Unavailable)?;
        let mut conn = pool
            .get()
            .await
            .map_err(|e| StoreError::unavailable(format!("failed to get Redis connection: {e}")))?;
        let memory_budget = read_memory_budget(&mut conn).await;

        tracing::info!(memory_budget, "Connected to Redis cache store");
        Ok(Self {
            pool,
            memory_budget,
        })
    }

    /// Wrap an existing pool with a known budget.
    pub fn from_pool(pool: Pool, memory_budget: u64) -> Self {
        Self {
            pool,
            memory_budget,
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn connection(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::unavailable(format!("failed to get Redis connection: {e}")))
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|e| StoreError::unavailable(format!("Redis GET error: {e}")))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        ensure_within_budget(value.len(), self.memory_budget)?;
        let mut conn = self.connection().await?;
        conn.pset_ex::<_, _, ()>(key, value.as_slice(), ttl_millis(ttl))
            .await
            .map_err(|e| StoreError::unavailable(format!("Redis PSETEX error: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| StoreError::unavailable(format!("Redis DEL error: {e}")))
    }

    fn memory_budget(&self) -> u64 {
        self.memory_budget
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Create a deadpool pool with the configured size and timeouts.
pub(crate) fn create_pool(config: &RedisConfig) -> Result<Pool, String> {
    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let mut pool_config = redis_config
        .pool
        .take()
        .unwrap_or_else(|| deadpool_redis::PoolConfig::new(config.pool_size));
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(config.timeout());
    pool_config.timeouts.create = Some(config.timeout());
    pool_config.timeouts.recycle = Some(config.timeout());
    redis_config.pool = Some(pool_config);

    redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| format!("failed to create Redis pool: {e}"))
}

async fn read_memory_budget(conn: &mut Connection) -> u64 {
    let reply: ::redis::RedisResult<HashMap<String, String>> = ::redis::cmd("CONFIG")
        .arg("GET")
        .arg("maxmemory")
        .query_async(conn)
        .await;
    match reply {
        Ok(values) => parse_maxmemory(&values),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read Redis maxmemory, capacity guard disabled");
            0
        }
    }
}

fn parse_maxmemory(reply: &HashMap<String, String>) -> u64 {
    reply
        .get("maxmemory")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Redis rejects a zero expiry, so sub-millisecond TTLs round up to 1 ms.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_maxmemory() {
        assert_eq!(parse_maxmemory(&reply(&[("maxmemory", "104857600")])), 104_857_600);
        assert_eq!(parse_maxmemory(&reply(&[("maxmemory", "0")])), 0);
    }

    #[test]
    fn test_parse_maxmemory_unknown() {
        assert_eq!(parse_maxmemory(&reply(&[])), 0);
        assert_eq!(parse_maxmemory(&reply(&[("maxmemory", "lots")])), 0);
    }

    #[test]
    fn test_ttl_millis() {
        assert_eq!(ttl_millis(Duration::from_secs(300)), 300_000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn test_create_pool_applies_size() {
        let config = RedisConfig {
            enabled: true,
            pool_size: 3,
            ..Default::default()
        };
        // Pool creation is lazy and does not connect
        let pool = create_pool(&config).unwrap();
        assert_eq!(pool.status().max_size, 3);
    }
}
