//! Injected observer for cache events.
//!
//! The interceptor never logs on its own. Every hit, miss and absorbed
//! failure is reported as a [`CacheEvent`] to a [`CacheObserver`], which
//! defaults to [`TracingObserver`].

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{BusError, CodecError, StoreError};

/// Store call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Get,
    Set,
    Delete,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Set => write!(f, "set"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Why an invalidation listener ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// [`Subscription::stop`](crate::Subscription::stop) was called.
    Stopped,
    /// The owning interceptor was shut down or dropped.
    Shutdown,
    /// The bus was closed.
    BusClosed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Shutdown => write!(f, "interceptor shut down"),
            Self::BusClosed => write!(f, "bus closed"),
        }
    }
}

/// Something the cache did or absorbed.
#[derive(Debug)]
pub enum CacheEvent<'a> {
    Hit {
        key: &'a str,
        method: &'a str,
    },
    Miss {
        key: &'a str,
        method: &'a str,
    },
    /// Stored bytes did not decode; the entry is deleted.
    Corrupt {
        key: &'a str,
        error: &'a CodecError,
    },
    StoreUnavailable {
        key: &'a str,
        operation: StoreOperation,
        error: &'a StoreError,
    },
    /// The response could not be encoded and was returned uncached.
    EncodeFailed {
        key: &'a str,
        error: &'a CodecError,
    },
    /// The encoded response is larger than the memory budget.
    CapacityExceeded {
        key: &'a str,
        size: usize,
        budget: u64,
    },
    Populated {
        key: &'a str,
        size: usize,
        ttl: Duration,
    },
    Invalidated {
        key: &'a str,
        channel: &'a str,
    },
    /// A notification whose payload is not the listener's key.
    InvalidationIgnored {
        channel: &'a str,
        payload: &'a str,
    },
    /// The notification stream ended unexpectedly and a new subscription
    /// was acknowledged. The key is purged next.
    Resubscribed {
        key: &'a str,
        channel: &'a str,
    },
    ResubscribeFailed {
        key: &'a str,
        channel: &'a str,
        error: &'a BusError,
        retry_in: Duration,
    },
    ListenerStopped {
        key: &'a str,
        channel: &'a str,
        reason: StopReason,
    },
}

/// Payload-free discriminant of [`CacheEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEventKind {
    Hit,
    Miss,
    Corrupt,
    StoreUnavailable,
    EncodeFailed,
    CapacityExceeded,
    Populated,
    Invalidated,
    InvalidationIgnored,
    Resubscribed,
    ResubscribeFailed,
    ListenerStopped,
}

impl CacheEvent<'_> {
    pub fn kind(&self) -> CacheEventKind {
        match self {
            Self::Hit { .. } => CacheEventKind::Hit,
            Self::Miss { .. } => CacheEventKind::Miss,
            Self::Corrupt { .. } => CacheEventKind::Corrupt,
            Self::StoreUnavailable { .. } => CacheEventKind::StoreUnavailable,
            Self::EncodeFailed { .. } => CacheEventKind::EncodeFailed,
            Self::CapacityExceeded { .. } => CacheEventKind::CapacityExceeded,
            Self::Populated { .. } => CacheEventKind::Populated,
            Self::Invalidated { .. } => CacheEventKind::Invalidated,
            Self::InvalidationIgnored { .. } => CacheEventKind::InvalidationIgnored,
            Self::Resubscribed { .. } => CacheEventKind::Resubscribed,
            Self::ResubscribeFailed { .. } => CacheEventKind::ResubscribeFailed,
            Self::ListenerStopped { .. } => CacheEventKind::ListenerStopped,
        }
    }

    /// Cache key the event concerns, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Hit { key, .. }
            | Self::Miss { key, .. }
            | Self::Corrupt { key, .. }
            | Self::StoreUnavailable { key, .. }
            | Self::EncodeFailed { key, .. }
            | Self::CapacityExceeded { key, .. }
            | Self::Populated { key, .. }
            | Self::Invalidated { key, .. }
            | Self::Resubscribed { key, .. }
            | Self::ResubscribeFailed { key, .. }
            | Self::ListenerStopped { key, .. } => Some(*key),
            Self::InvalidationIgnored { .. } => None,
        }
    }
}

/// Receives cache events. Implementations must not block.
pub trait CacheObserver: Send + Sync {
    fn on_event(&self, event: &CacheEvent<'_>);
}

/// Default observer: structured `tracing` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl CacheObserver for TracingObserver {
    fn on_event(&self, event: &CacheEvent<'_>) {
        match event {
            CacheEvent::Hit { key, method } => {
                tracing::debug!(key = %key, method = %method, "cache hit");
            }
            CacheEvent::Miss { key, method } => {
                tracing::debug!(key = %key, method = %method, "cache miss");
            }
            CacheEvent::Corrupt { key, error } => {
                tracing::warn!(key = %key, error = %error, "corrupted cache entry, invalidating");
            }
            CacheEvent::StoreUnavailable {
                key,
                operation,
                error,
            } => {
                tracing::warn!(key = %key, operation = %operation, error = %error, "cache store error");
            }
            CacheEvent::EncodeFailed { key, error } => {
                tracing::warn!(key = %key, error = %error, "failed to encode response for cache");
            }
            CacheEvent::CapacityExceeded { key, size, budget } => {
                tracing::warn!(key = %key, size, budget, "response exceeds cache memory budget, not cached");
            }
            CacheEvent::Populated { key, size, ttl } => {
                tracing::debug!(key = %key, size, ttl_ms = ttl.as_millis() as u64, "cached response");
            }
            CacheEvent::Invalidated { key, channel } => {
                tracing::info!(key = %key, channel = %channel, "cache entry invalidated");
            }
            CacheEvent::InvalidationIgnored { channel, payload } => {
                tracing::trace!(channel = %channel, payload = %payload, "ignoring invalidation for other key");
            }
            CacheEvent::Resubscribed { key, channel } => {
                tracing::info!(key = %key, channel = %channel, "resubscribed to invalidation channel, purging key");
            }
            CacheEvent::ResubscribeFailed {
                key,
                channel,
                error,
                retry_in,
            } => {
                tracing::error!(
                    key = %key,
                    channel = %channel,
                    error = %error,
                    backoff_ms = retry_in.as_millis() as u64,
                    "invalidation listener error, reconnecting..."
                );
            }
            CacheEvent::ListenerStopped {
                key,
                channel,
                reason,
            } => {
                tracing::info!(key = %key, channel = %channel, reason = %reason, "invalidation listener stopped");
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CacheObserver for NoopObserver {
    fn on_event(&self, _event: &CacheEvent<'_>) {}
}

/// Owned summary of an event kept by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub kind: CacheEventKind,
    pub key: Option<String>,
}

/// Keeps every event in memory, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<CacheEventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: CacheEventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl CacheObserver for RecordingObserver {
    fn on_event(&self, event: &CacheEvent<'_>) {
        self.events.lock().push(RecordedEvent {
            kind: event.kind(),
            key: event.key().map(str::to_string),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer_counts_kinds() {
        let observer = RecordingObserver::new();
        observer.on_event(&CacheEvent::Miss {
            key: "markets:list",
            method: "GetMarkets",
        });
        observer.on_event(&CacheEvent::Hit {
            key: "markets:list",
            method: "GetMarkets",
        });
        observer.on_event(&CacheEvent::Hit {
            key: "markets:list",
            method: "GetMarkets",
        });

        assert_eq!(observer.count(CacheEventKind::Hit), 2);
        assert_eq!(observer.count(CacheEventKind::Miss), 1);
        assert_eq!(
            observer.kinds(),
            vec![CacheEventKind::Miss, CacheEventKind::Hit, CacheEventKind::Hit]
        );

        observer.clear();
        assert!(observer.events().is_empty());
    }

    #[test]
    fn test_ignored_invalidation_has_no_key() {
        let event = CacheEvent::InvalidationIgnored {
            channel: "markets:invalidated",
            payload: "tickers:list",
        };
        assert_eq!(event.kind(), CacheEventKind::InvalidationIgnored);
        assert_eq!(event.key(), None);

        let error = StoreError::unavailable("connection refused");
        let event = CacheEvent::StoreUnavailable {
            key: "markets:list",
            operation: StoreOperation::Delete,
            error: &error,
        };
        assert_eq!(event.key(), Some("markets:list"));
    }

    #[test]
    fn test_display() {
        assert_eq!(StoreOperation::Get.to_string(), "get");
        assert_eq!(StopReason::BusClosed.to_string(), "bus closed");
        assert_eq!(StopReason::Shutdown.to_string(), "interceptor shut down");
    }
}
