use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Settings for the response cache of one service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheSettings {
    /// Redis store and invalidation bus
    #[serde(default)]
    pub redis: RedisConfig,
    /// Cached routes, one cache key per method
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// Invalidation channels to listen on
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CacheSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis.enabled && self.redis.url.trim().is_empty() {
            return Err(ConfigError::validation(
                "redis.enabled=true requires redis.url",
            ));
        }
        if self.redis.pool_size == 0 {
            return Err(ConfigError::validation("redis.pool_size must be > 0"));
        }
        if self.redis.timeout_ms == 0 {
            return Err(ConfigError::validation("redis.timeout_ms must be > 0"));
        }

        let mut methods = HashSet::new();
        let mut keys = HashSet::new();
        for route in &self.routes {
            if route.cache_key.trim().is_empty() {
                return Err(ConfigError::validation("routes.cache_key must not be empty"));
            }
            if route.method.trim().is_empty() {
                return Err(ConfigError::validation("routes.method must not be empty"));
            }
            if route.ttl_secs == 0 {
                return Err(ConfigError::validation(format!(
                    "routes.ttl_secs must be > 0 (route {})",
                    route.method
                )));
            }
            if !methods.insert(route.method.as_str()) {
                return Err(ConfigError::validation(format!(
                    "duplicate route for method {}",
                    route.method
                )));
            }
            keys.insert(route.cache_key.as_str());
        }

        for sub in &self.subscriptions {
            if sub.channel.trim().is_empty() {
                return Err(ConfigError::validation(
                    "subscriptions.channel must not be empty",
                ));
            }
            if !keys.contains(sub.cache_key.as_str()) {
                return Err(ConfigError::validation(format!(
                    "subscription on {} refers to unknown cache key {}",
                    sub.channel, sub.cache_key
                )));
            }
        }

        crate::observability::level_filter(&self.logging.level)?;
        Ok(())
    }

    /// Route configured for `method`, if any.
    pub fn route(&self, method: &str) -> Option<&RouteConfig> {
        self.routes.iter().find(|r| r.method == method)
    }
}

/// Redis connection settings shared by the store and the invalidation bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (the store degrades to in-memory without it)
    /// Default: false
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection and acknowledgement timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// One cached method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Store key holding the cached response (e.g. "markets:list")
    pub cache_key: String,
    /// Full method identifier the route applies to
    pub method: String,
    /// Entry time-to-live in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl RouteConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_ttl_secs() -> u64 {
    300 // 5 minutes
}

/// Binding of an invalidation channel to the cache key it purges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionConfig {
    pub cache_key: String,
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level or filter directives, e.g. "info" or "rpc_cache=debug,warn"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::{CacheSettings, ConfigError};
    use config::{Config, Environment, File, Map};
    use std::path::PathBuf;

    /// Default file looked up when no path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "rpc-cache.toml";

    /// Load settings from an optional TOML file plus `RPC_CACHE__*` overrides.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_settings(path: Option<&str>) -> Result<CacheSettings, ConfigError> {
        load_settings_with_env(path, None)
    }

    /// Like [`load_settings`], reading overrides from `env` instead of the
    /// process environment when given.
    pub fn load_settings_with_env(
        path: Option<&str>,
        env: Option<Map<String, String>>,
    ) -> Result<CacheSettings, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., RPC_CACHE__REDIS__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("RPC_CACHE")
                .try_parsing(true)
                .separator("__")
                .source(env),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::parse(format!("config build error: {e}")))?;
        let merged: CacheSettings = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::parse(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markets_settings() -> CacheSettings {
        CacheSettings {
            routes: vec![RouteConfig {
                cache_key: "markets:list".to_string(),
                method: "GetMarkets".to_string(),
                ttl_secs: 300,
            }],
            subscriptions: vec![SubscriptionConfig {
                cache_key: "markets:list".to_string(),
                channel: "markets:invalidated".to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = CacheSettings::default();
        assert!(settings.validate().is_ok());
        assert!(!settings.redis.enabled);
        assert_eq!(settings.redis.timeout(), Duration::from_secs(5));
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_route_lookup_and_ttl() {
        let settings = markets_settings();
        assert!(settings.validate().is_ok());
        let route = settings.route("GetMarkets").unwrap();
        assert_eq!(route.ttl(), Duration::from_secs(300));
        assert!(settings.route("GetTickers").is_none());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut settings = markets_settings();
        settings.routes[0].ttl_secs = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("ttl_secs must be > 0"));
    }

    #[test]
    fn test_duplicate_method_rejected() {
        let mut settings = markets_settings();
        let mut dup = settings.routes[0].clone();
        dup.cache_key = "markets:other".to_string();
        settings.routes.push(dup);
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate route"));
    }

    #[test]
    fn test_subscription_must_reference_route_key() {
        let mut settings = markets_settings();
        settings.subscriptions[0].cache_key = "tickers:list".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("unknown cache key tickers:list"));
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let mut settings = markets_settings();
        settings.logging.level = "rpc_cache=verbose".to_string();
        assert!(matches!(settings.validate(), Err(ConfigError::Validation(_))));
    }
}
