//! Per-method cache-aside interceptor.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rpc_intercept::{CallContext, Next, Result, UnaryInterceptor};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec;
use crate::error::{CodecError, StoreError};
use crate::observer::{CacheEvent, CacheObserver, StoreOperation};
use crate::store::{CacheStore, ensure_within_budget};

/// Counters of one route.
#[derive(Debug, Default)]
pub(crate) struct RouteCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    corrupt: AtomicU64,
    populated: AtomicU64,
    skipped_writes: AtomicU64,
    store_errors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Snapshot of a route's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries that failed to decode and were deleted
    pub corrupt: u64,
    pub populated: u64,
    /// Responses returned uncached (encode failure or over budget)
    pub skipped_writes: u64,
    pub store_errors: u64,
}

impl RouteStats {
    /// Hit rate as a percentage (0.0 - 100.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Caches the response of a single method under a fixed key.
///
/// ## Call flow
///
/// 1. Other methods pass straight through
/// 2. `get(cache_key)`: a decodable entry is returned without calling the
///    rest of the chain; an undecodable one is deleted and treated as a miss
/// 3. On a miss the call proceeds; errors are returned and nothing is cached
/// 4. The response is encoded and stored for `ttl` unless it exceeds the
///    memory budget
///
/// Store and codec failures never reach the caller; they are reported to the
/// observer. When the call carries a deadline the lookup is bounded by it and
/// the write runs on a detached task, so a slow store cannot turn a
/// successful call into `DeadlineExceeded`. Concurrent misses each call
/// through and write independently.
pub struct CachedRoute<Resp> {
    cache_key: String,
    method: String,
    ttl: Duration,
    store: Arc<dyn CacheStore>,
    observer: Arc<dyn CacheObserver>,
    memory_budget: u64,
    counters: Arc<RouteCounters>,
    _response: PhantomData<fn() -> Resp>,
}

impl<Resp> CachedRoute<Resp>
where
    Resp: Serialize + DeserializeOwned,
{
    pub(crate) fn new(
        cache_key: String,
        method: String,
        ttl: Duration,
        store: Arc<dyn CacheStore>,
        observer: Arc<dyn CacheObserver>,
        memory_budget: u64,
    ) -> Self {
        Self {
            cache_key,
            method,
            ttl,
            store,
            observer,
            memory_budget,
            counters: Arc::new(RouteCounters::default()),
            _response: PhantomData,
        }
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> RouteStats {
        let c = &self.counters;
        RouteStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            corrupt: c.corrupt.load(Ordering::Relaxed),
            populated: c.populated.load(Ordering::Relaxed),
            skipped_writes: c.skipped_writes.load(Ordering::Relaxed),
            store_errors: c.store_errors.load(Ordering::Relaxed),
        }
    }

    /// Delete the cached response now.
    pub async fn invalidate(&self) -> std::result::Result<(), StoreError> {
        self.store.delete(&self.cache_key).await
    }

    /// Lookup bounded by the caller's deadline; an elapsed bound is a miss.
    async fn lookup_within(&self, deadline: Option<tokio::time::Instant>) -> Option<Resp> {
        let Some(deadline) = deadline else {
            return self.lookup().await;
        };
        match tokio::time::timeout_at(deadline, self.lookup()).await {
            Ok(response) => response,
            Err(_) => {
                let error = StoreError::unavailable("lookup exceeded the call deadline");
                self.store_error(StoreOperation::Get, &error);
                None
            }
        }
    }

    async fn lookup(&self) -> Option<Resp> {
        let bytes = match self.store.get(&self.cache_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(error) => {
                self.store_error(StoreOperation::Get, &error);
                return None;
            }
        };

        match codec::decode::<Resp>(&bytes) {
            Ok(response) => Some(response),
            Err(error) => {
                bump(&self.counters.corrupt);
                self.observer.on_event(&CacheEvent::Corrupt {
                    key: &self.cache_key,
                    error: &error,
                });
                // Self-heal so the next call repopulates
                if let Err(error) = self.store.delete(&self.cache_key).await {
                    self.store_error(StoreOperation::Delete, &error);
                }
                None
            }
        }
    }

    async fn populate(&self, encoded: std::result::Result<Vec<u8>, CodecError>) {
        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(error) => {
                bump(&self.counters.skipped_writes);
                self.observer.on_event(&CacheEvent::EncodeFailed {
                    key: &self.cache_key,
                    error: &error,
                });
                return;
            }
        };

        let size = bytes.len();
        if let Err(StoreError::CapacityExceeded { size, budget }) =
            ensure_within_budget(size, self.memory_budget)
        {
            self.capacity_exceeded(size, budget);
            return;
        }

        match self.store.set(&self.cache_key, bytes, self.ttl).await {
            Ok(()) => {
                bump(&self.counters.populated);
                self.observer.on_event(&CacheEvent::Populated {
                    key: &self.cache_key,
                    size,
                    ttl: self.ttl,
                });
            }
            Err(StoreError::CapacityExceeded { size, budget }) => {
                self.capacity_exceeded(size, budget);
            }
            Err(error) => self.store_error(StoreOperation::Set, &error),
        }
    }

    fn capacity_exceeded(&self, size: usize, budget: u64) {
        bump(&self.counters.skipped_writes);
        self.observer.on_event(&CacheEvent::CapacityExceeded {
            key: &self.cache_key,
            size,
            budget,
        });
    }

    fn store_error(&self, operation: StoreOperation, error: &StoreError) {
        bump(&self.counters.store_errors);
        self.observer.on_event(&CacheEvent::StoreUnavailable {
            key: &self.cache_key,
            operation,
            error,
        });
    }
}

#[async_trait]
impl<Req, Resp> UnaryInterceptor<Req, Resp> for CachedRoute<Resp>
where
    Req: Send + 'static,
    Resp: Serialize + DeserializeOwned + Send + 'static,
{
    async fn intercept(
        &self,
        ctx: CallContext,
        request: Req,
        next: Next<'_, Req, Resp>,
    ) -> Result<Resp> {
        if ctx.method != self.method {
            return next.run(ctx, request).await;
        }

        // Captured before `next` consumes the context
        let deadline = ctx.deadline.map(tokio::time::Instant::from_std);

        if let Some(response) = self.lookup_within(deadline).await {
            bump(&self.counters.hits);
            self.observer.on_event(&CacheEvent::Hit {
                key: &self.cache_key,
                method: &self.method,
            });
            return Ok(response);
        }

        bump(&self.counters.misses);
        self.observer.on_event(&CacheEvent::Miss {
            key: &self.cache_key,
            method: &self.method,
        });

        let response = next.run(ctx, request).await?;
        let encoded = codec::encode(&response);
        if deadline.is_some() {
            // The write may outlive the call but must not delay its response
            let route = self.clone();
            tokio::spawn(async move { route.populate(encoded).await });
        } else {
            self.populate(encoded).await;
        }
        Ok(response)
    }

    fn name(&self) -> &str {
        "response_cache"
    }
}

impl<Resp> Clone for CachedRoute<Resp> {
    fn clone(&self) -> Self {
        Self {
            cache_key: self.cache_key.clone(),
            method: self.method.clone(),
            ttl: self.ttl,
            store: self.store.clone(),
            observer: self.observer.clone(),
            memory_budget: self.memory_budget,
            counters: self.counters.clone(),
            _response: PhantomData,
        }
    }
}

impl<Resp> std::fmt::Debug for CachedRoute<Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedRoute")
            .field("cache_key", &self.cache_key)
            .field("method", &self.method)
            .field("ttl", &self.ttl)
            .field("store", &self.store.name())
            .field("memory_budget", &self.memory_budget)
            .finish()
    }
}
