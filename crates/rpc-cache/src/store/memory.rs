//! In-memory cache store backed by DashMap.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheStore, ensure_within_budget};
use crate::error::StoreError;

/// Stored payload with its expiry.
#[derive(Clone, Debug)]
struct StoredEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Per-instance store with TTL expiry and an optional memory budget.
///
/// Expired entries are treated as absent and removed when read. Nothing
/// sweeps them in the background: cached routes use fixed keys, so the map
/// holds at most one entry per route. Callers storing arbitrary keys should
/// call [`cleanup_expired`](Self::cleanup_expired) periodically.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredEntry>,
    memory_budget: u64,
}

impl MemoryStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects payloads larger than `budget` bytes.
    pub fn with_memory_budget(budget: u64) -> Self {
        Self {
            entries: DashMap::new(),
            memory_budget: budget,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries.get(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Remaining lifetime of `key`, `None` when absent or expired.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.expires_at.saturating_duration_since(now))
    }

    /// Remove expired entries that were never read again, returning how many
    /// were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.data.clone()));
            }
            // Release the shard lock before removing
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        ensure_within_budget(value.len(), self.memory_budget)?;
        let entry = StoredEntry {
            data: value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn memory_budget(&self) -> u64 {
        self.memory_budget
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        store
            .set("markets:list", b"payload".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let value = store.get("markets:list").await.unwrap();
        assert_eq!(value, Some(b"payload".to_vec()));
        assert_eq!(store.len(), 1);
        assert!(store.ttl("markets:list").unwrap() > Duration::from_secs(59));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nonexistent").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expiration() {
        let store = MemoryStore::new();
        store
            .set("expiring", b"value".to_vec(), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(store.contains_key("expiring"));

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get("expiring").await.unwrap(), None);
        assert!(!store.contains_key("expiring"));
        assert_eq!(store.cleanup_expired(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store
                .set(&format!("key-{i}"), vec![i], Duration::from_millis(10))
                .await
                .unwrap();
        }
        store
            .set("long-lived", vec![9], Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.cleanup_expired(), 3);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store
            .set("key", b"value".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        store.delete("key").await.unwrap();
        store.delete("key").await.unwrap();
        store.delete("never-set").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_rejects_oversized_payload() {
        let store = MemoryStore::with_memory_budget(100);
        assert_eq!(store.memory_budget(), 100);

        let err = store
            .set("big", vec![0; 200], Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::CapacityExceeded {
                size: 200,
                budget: 100
            }
        ));
        assert!(store.is_empty());

        store
            .set("small", vec![0; 100], Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
    }
}
