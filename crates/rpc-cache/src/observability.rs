//! Logging setup for services that embed the cache.
//!
//! Library code only emits `tracing` events. A service installs the
//! subscriber once, normally through [`crate::bootstrap`], and keeps the
//! returned [`LogLevelHandle`] to change `logging.level` at runtime.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::{ConfigError, LoggingConfig};

/// Reload handle for the filter installed by [`init_logging`].
#[derive(Clone)]
pub struct LogLevelHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    level: Arc<RwLock<String>>,
    installed: bool,
}

impl LogLevelHandle {
    /// False when another global subscriber was already in place; the
    /// configured level is then not applied.
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Filter directive currently in effect.
    pub fn level(&self) -> String {
        self.level.read().clone()
    }

    pub fn set_level(&self, level: &str) -> Result<(), ConfigError> {
        let filter = level_filter(level)?;
        self.handle
            .modify(|current| *current = filter)
            .map_err(|e| ConfigError::validation(format!("failed to reload logging.level: {e}")))?;
        *self.level.write() = level.to_string();
        tracing::info!(level, "logging level changed");
        Ok(())
    }
}

impl std::fmt::Debug for LogLevelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogLevelHandle")
            .field("level", &self.level())
            .field("installed", &self.installed)
            .finish()
    }
}

/// Parse a filter directive such as `info` or `rpc_cache=debug,warn`.
pub fn level_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(level)
        .map_err(|e| ConfigError::validation(format!("invalid logging.level {level:?}: {e}")))
}

/// Install a `fmt` subscriber filtered by `logging.level`.
///
/// `RUST_LOG`, when set and valid, takes precedence over the configuration.
pub fn init_logging(logging: &LoggingConfig) -> Result<LogLevelHandle, ConfigError> {
    let (filter, level) = match std::env::var("RUST_LOG") {
        Ok(directives) if EnvFilter::try_new(&directives).is_ok() => {
            (level_filter(&directives)?, directives)
        }
        _ => (level_filter(&logging.level)?, logging.level.clone()),
    };

    let (reload_layer, handle) = reload::Layer::new(filter);
    let installed = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer())
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(level = %level, "logging initialized");
    }

    Ok(LogLevelHandle {
        handle,
        level: Arc::new(RwLock::new(level)),
        installed,
    })
}
