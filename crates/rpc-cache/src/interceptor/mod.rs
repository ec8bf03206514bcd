//! Response-caching interceptor.
//!
//! [`CacheInterceptor`] owns the store, the invalidation bus and the
//! observer. It hands out one [`CachedRoute`] per cached method and one
//! [`Subscription`] per invalidation channel.
//!
//! ```ignore
//! let cache = CacheInterceptor::new(store, bus);
//! let route = cache.for_route::<Markets>("markets:list", "GetMarkets", Duration::from_secs(300));
//! let chain = InterceptorChain::new().with(PanicRecovery).with(route);
//! let _subscription = cache.subscribe("markets:list", "markets:invalidated").await?;
//! ```

mod route;
mod subscription;

pub use self::route::{CachedRoute, RouteStats};
pub use self::subscription::Subscription;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::bus::{InvalidationBus, connect_bus};
use crate::config::{CacheSettings, RouteConfig, SubscriptionConfig};
use crate::error::{BusError, Result};
use crate::observer::{CacheObserver, TracingObserver};
use crate::store::{CacheStore, connect_store};

use self::subscription::Listener;

pub struct CacheInterceptor {
    store: Arc<dyn CacheStore>,
    bus: Arc<dyn InvalidationBus>,
    observer: Arc<dyn CacheObserver>,
    /// Snapshot taken at construction
    memory_budget: u64,
    /// Flipped by `shutdown`; dropping it stops every listener as well
    lifetime: watch::Sender<bool>,
}

impl CacheInterceptor {
    /// Create an interceptor that reports to [`TracingObserver`].
    pub fn new(store: Arc<dyn CacheStore>, bus: Arc<dyn InvalidationBus>) -> Self {
        Self::with_observer(store, bus, Arc::new(TracingObserver))
    }

    pub fn with_observer(
        store: Arc<dyn CacheStore>,
        bus: Arc<dyn InvalidationBus>,
        observer: Arc<dyn CacheObserver>,
    ) -> Self {
        let memory_budget = store.memory_budget();
        tracing::debug!(
            store = store.name(),
            bus = bus.name(),
            memory_budget,
            "cache interceptor created"
        );
        let (lifetime, _) = watch::channel(false);
        Self {
            store,
            bus,
            observer,
            memory_budget,
            lifetime,
        }
    }

    /// Connect the store and bus described by `settings`.
    ///
    /// The store falls back to memory when Redis is unreachable; a bus that
    /// cannot be created is an error.
    pub async fn from_settings(settings: &CacheSettings) -> Result<Self> {
        settings.validate()?;
        let store = connect_store(&settings.redis).await;
        let bus = connect_bus(&settings.redis)?;
        Ok(Self::new(store, bus))
    }

    /// Replace the observer for routes and subscriptions created afterwards.
    pub fn observe(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn memory_budget(&self) -> u64 {
        self.memory_budget
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<dyn InvalidationBus> {
        &self.bus
    }

    /// Cache responses of `method` under `cache_key` for `ttl`.
    pub fn for_route<Resp>(
        &self,
        cache_key: impl Into<String>,
        method: impl Into<String>,
        ttl: Duration,
    ) -> CachedRoute<Resp>
    where
        Resp: Serialize + DeserializeOwned,
    {
        CachedRoute::new(
            cache_key.into(),
            method.into(),
            ttl,
            self.store.clone(),
            self.observer.clone(),
            self.memory_budget,
        )
    }

    pub fn route_from_config<Resp>(&self, route: &RouteConfig) -> CachedRoute<Resp>
    where
        Resp: Serialize + DeserializeOwned,
    {
        self.for_route(route.cache_key.clone(), route.method.clone(), route.ttl())
    }

    /// Delete `cache_key` whenever a notification carrying it arrives on
    /// `channel`.
    ///
    /// Returns once the bus has acknowledged the subscription, so anything
    /// published after this call resolves is observed. The listener keeps
    /// running if the returned handle is dropped.
    pub async fn subscribe(
        &self,
        cache_key: impl Into<String>,
        channel: impl Into<String>,
    ) -> std::result::Result<Subscription, BusError> {
        let cache_key = cache_key.into();
        let channel = channel.into();
        let messages = self.bus.subscribe(&channel).await?;
        tracing::info!(key = %cache_key, channel = %channel, "invalidation listener started");
        let listener = Listener {
            cache_key,
            channel,
            bus: self.bus.clone(),
            store: self.store.clone(),
            observer: self.observer.clone(),
        };
        Ok(Subscription::spawn(
            listener,
            messages,
            self.lifetime.subscribe(),
        ))
    }

    /// Stop every listener started by this interceptor.
    ///
    /// Dropping the interceptor has the same effect. Routes keep working.
    pub fn shutdown(&self) {
        self.lifetime.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.lifetime.borrow()
    }

    /// Subscribe every configured channel, failing on the first error.
    ///
    /// On failure the listeners already started are stopped.
    pub async fn subscribe_all(
        &self,
        subscriptions: &[SubscriptionConfig],
    ) -> std::result::Result<Vec<Subscription>, BusError> {
        let mut handles = Vec::with_capacity(subscriptions.len());
        for sub in subscriptions {
            match self.subscribe(sub.cache_key.as_str(), sub.channel.as_str()).await {
                Ok(handle) => handles.push(handle),
                Err(error) => {
                    for handle in handles {
                        handle.stop().await;
                    }
                    return Err(error);
                }
            }
        }
        Ok(handles)
    }
}

impl std::fmt::Debug for CacheInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInterceptor")
            .field("store", &self.store.name())
            .field("bus", &self.bus.name())
            .field("memory_budget", &self.memory_budget)
            .finish()
    }
}
