//! Response caching for unary RPC calls.
//!
//! A [`CachedRoute`] sits in an [`rpc_intercept::InterceptorChain`] and
//! serves one method from a [`CacheStore`] (cache-aside, fixed key, TTL).
//! A [`Subscription`] listens on an [`InvalidationBus`] channel and deletes
//! the key when a producer announces that the data changed.
//!
//! ## Modules
//!
//! - [`store`]: Redis and in-memory stores with a memory budget guard
//! - [`bus`]: Redis Pub/Sub and in-process invalidation buses
//! - [`codec`]: MessagePack payload encoding
//! - [`interceptor`]: the interceptor, typed routes and subscriptions
//! - [`observer`]: injected event sink, `tracing` by default
//! - [`config`]: TOML + environment settings
//! - [`observability`]: subscriber setup with a reloadable level
//!
//! Services usually start with [`bootstrap`].

pub mod bus;
pub mod codec;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod observability;
pub mod observer;
mod runtime;
pub mod store;

pub use bus::{InvalidationBus, MemoryBus, Notification, NotificationStream, RedisBus, connect_bus};
pub use config::{CacheSettings, ConfigError, RedisConfig, RouteConfig, SubscriptionConfig};
pub use error::{BusError, CodecError, Error, Result, StoreError};
pub use interceptor::{CacheInterceptor, CachedRoute, RouteStats, Subscription};
pub use observer::{
    CacheEvent, CacheEventKind, CacheObserver, NoopObserver, RecordingObserver, TracingObserver,
};
pub use observability::LogLevelHandle;
pub use runtime::{CacheRuntime, bootstrap};
pub use store::{CacheStore, MemoryStore, RedisStore, connect_store};
