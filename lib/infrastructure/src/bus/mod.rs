use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::FutureExt as _;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// In-process fan-out hub for one event type.
///
/// Every subscriber gets its own unbounded queue and its own task. Events are processed in
/// publish order per subscriber, but subscribers do not wait for each other: a slow, failing
/// or panicking handler only affects its own queue.
pub struct EventHub<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    next_id: AtomicU64,
    subscribers: DashMap<u64, mpsc::UnboundedSender<T>>,
}

impl<T> Clone for EventHub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + std::fmt::Debug + 'static> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + std::fmt::Debug + 'static> EventHub<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                subscribers: DashMap::new(),
            }),
        }
    }

    /// Registers a handler. Must be called from within a tokio runtime.
    pub fn subscribe<F, Fut>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();
        self.inner.subscribers.insert(id, tx);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let handled = AssertUnwindSafe(async { handler(event).await }).catch_unwind().await;

                match handled {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!("Handler {} for {} failed: {:?}", id, std::any::type_name::<T>(), e);
                    }
                    Err(_) => {
                        tracing::error!("Handler {} for {} panicked", id, std::any::type_name::<T>());
                    }
                }
            }

            tracing::debug!("Handler {} for {} stopped", id, std::any::type_name::<T>());
        });

        SubscriptionToken(id)
    }

    /// Returns `true` if the token was still registered. Calling it again is a no-op.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.inner.subscribers.remove(&token.0).is_some()
    }

    /// Queues the event for every current subscriber and returns how many received it.
    pub fn publish(&self, event: T) -> usize {
        let mut delivered = 0;
        let mut closed = vec![];

        for subscriber in self.inner.subscribers.iter() {
            match subscriber.value().send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => closed.push(*subscriber.key()),
            }
        }

        for id in closed {
            tracing::warn!("Removing closed handler {} for {}", id, std::any::type_name::<T>());
            self.inner.subscribers.remove(&id);
        }

        if delivered == 0 {
            tracing::debug!("No handler for event {:?}", event);
        }

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}
