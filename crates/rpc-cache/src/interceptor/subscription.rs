//! Invalidation listener bound to one cache key.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::bus::{InvalidationBus, Notification, NotificationStream};
use crate::observer::{CacheEvent, CacheObserver, StopReason, StoreOperation};
use crate::store::CacheStore;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(300); // 5 minutes max

/// Handle for a running invalidation listener.
///
/// The listener deletes its cache key whenever a notification with exactly
/// that key as payload arrives on its channel. It runs for the lifetime of
/// the [`CacheInterceptor`](super::CacheInterceptor) that created it, until
/// [`stop`](Self::stop) is called, or until the bus is closed. Dropping the
/// handle detaches the listener without stopping it.
///
/// If the bus ends the stream without being closed (a lost connection), the
/// listener resubscribes with exponential backoff and purges its key once,
/// since invalidations may have been missed in the gap.
pub struct Subscription {
    cache_key: String,
    channel: String,
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl Subscription {
    /// Spawn the listener over an already acknowledged stream.
    pub(crate) fn spawn(
        listener: Listener,
        messages: NotificationStream,
        lifetime: watch::Receiver<bool>,
    ) -> Self {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let cache_key = listener.cache_key.clone();
        let channel = listener.channel.clone();
        let handle = tokio::spawn(listener.run(messages, shutdown_rx, lifetime));
        Self {
            cache_key,
            channel,
            handle,
            shutdown,
        }
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether the listener has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the listener and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cache_key", &self.cache_key)
            .field("channel", &self.channel)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// State owned by one listener task.
pub(crate) struct Listener {
    pub(crate) cache_key: String,
    pub(crate) channel: String,
    pub(crate) bus: Arc<dyn InvalidationBus>,
    pub(crate) store: Arc<dyn CacheStore>,
    pub(crate) observer: Arc<dyn CacheObserver>,
}

impl Listener {
    async fn run(
        self,
        mut messages: NotificationStream,
        shutdown: oneshot::Receiver<()>,
        lifetime: watch::Receiver<bool>,
    ) {
        let stop = stop_signal(shutdown, lifetime);
        tokio::pin!(stop);

        let reason = loop {
            tokio::select! {
                reason = &mut stop => break reason,
                message = messages.next() => match message {
                    Some(notification) => self.handle(notification).await,
                    None => match self.resubscribe(&mut stop).await {
                        Ok(stream) => {
                            messages = stream;
                            self.observer.on_event(&CacheEvent::Resubscribed {
                                key: &self.cache_key,
                                channel: &self.channel,
                            });
                            self.purge().await;
                        }
                        Err(reason) => break reason,
                    },
                },
            }
        };

        self.observer.on_event(&CacheEvent::ListenerStopped {
            key: &self.cache_key,
            channel: &self.channel,
            reason,
        });
    }

    async fn handle(&self, notification: Notification) {
        if notification.payload != self.cache_key {
            self.observer.on_event(&CacheEvent::InvalidationIgnored {
                channel: &notification.channel,
                payload: &notification.payload,
            });
            return;
        }
        self.purge().await;
    }

    async fn purge(&self) {
        match self.store.delete(&self.cache_key).await {
            Ok(()) => self.observer.on_event(&CacheEvent::Invalidated {
                key: &self.cache_key,
                channel: &self.channel,
            }),
            Err(error) => self.observer.on_event(&CacheEvent::StoreUnavailable {
                key: &self.cache_key,
                operation: StoreOperation::Delete,
                error: &error,
            }),
        }
    }

    /// Subscribe again after the stream ended, backing off between attempts.
    async fn resubscribe<S>(&self, stop: &mut S) -> Result<NotificationStream, StopReason>
    where
        S: Future<Output = StopReason> + Unpin,
    {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if self.bus.is_closed() {
                return Err(StopReason::BusClosed);
            }
            let attempt = tokio::select! {
                reason = &mut *stop => return Err(reason),
                attempt = self.bus.subscribe(&self.channel) => attempt,
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(_) if self.bus.is_closed() => return Err(StopReason::BusClosed),
                Err(error) => {
                    self.observer.on_event(&CacheEvent::ResubscribeFailed {
                        key: &self.cache_key,
                        channel: &self.channel,
                        error: &error,
                        retry_in: backoff,
                    });
                    tokio::select! {
                        reason = &mut *stop => return Err(reason),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

/// Resolves when the handle asks to stop or the interceptor shuts down.
/// A dropped handle never resolves it.
async fn stop_signal(
    shutdown: oneshot::Receiver<()>,
    mut lifetime: watch::Receiver<bool>,
) -> StopReason {
    let requested = async move {
        if shutdown.await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let interceptor_gone = async move {
        loop {
            let stopped = *lifetime.borrow_and_update();
            if stopped || lifetime.changed().await.is_err() {
                break;
            }
        }
    };
    tokio::select! {
        _ = requested => StopReason::Stopped,
        _ = interceptor_gone => StopReason::Shutdown,
    }
}
