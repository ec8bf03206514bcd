//! Service entry point: logging, store, bus and listeners from settings.

use crate::config::CacheSettings;
use crate::error::Result;
use crate::interceptor::{CacheInterceptor, Subscription};
use crate::observability::{LogLevelHandle, init_logging};

/// Everything a service keeps after [`bootstrap`].
#[derive(Debug)]
pub struct CacheRuntime {
    pub interceptor: CacheInterceptor,
    pub subscriptions: Vec<Subscription>,
    pub logging: LogLevelHandle,
}

/// Install logging from `settings.logging`, connect the store and bus, and
/// subscribe every configured channel.
///
/// Call it before accepting traffic: once it returns, every invalidation
/// channel is acknowledged.
///
/// ```ignore
/// let settings = rpc_cache::config::loader::load_settings(None)?;
/// let runtime = rpc_cache::bootstrap(&settings).await?;
/// let route = runtime
///     .interceptor
///     .route_from_config::<Markets>(settings.route("GetMarkets").unwrap());
/// ```
pub async fn bootstrap(settings: &CacheSettings) -> Result<CacheRuntime> {
    settings.validate()?;
    let logging = init_logging(&settings.logging)?;
    let interceptor = CacheInterceptor::from_settings(settings).await?;
    let subscriptions = interceptor.subscribe_all(&settings.subscriptions).await?;
    tracing::info!(
        routes = settings.routes.len(),
        subscriptions = subscriptions.len(),
        store = interceptor.store().name(),
        "response cache ready"
    );
    Ok(CacheRuntime {
        interceptor,
        subscriptions,
        logging,
    })
}

impl CacheRuntime {
    /// Stop every listener and wait for them to exit.
    pub async fn shutdown(self) {
        self.interceptor.shutdown();
        for subscription in self.subscriptions {
            subscription.stop().await;
        }
    }
}
