use std::collections::BTreeSet;

use infrastructure::MqttSession;
use tokio::sync::{Mutex, watch};

use crate::device::TopicDiff;
use crate::mqtt::MqttBus;
use crate::state::StateCache;

/// Keeps bus subscriptions and cache entries in line with the device configuration.
///
/// A topic only counts as subscribed once the broker acknowledged it. Topics whose call failed
/// are retried at the end of every reconciliation and after every reconnect.
pub struct SubscriptionManager<B: MqttBus> {
    bus: B,
    cache: StateCache,
    control_topic: String,
    subscribed: Mutex<BTreeSet<String>>,
}

impl<B: MqttBus> SubscriptionManager<B> {
    pub fn new(bus: B, cache: StateCache, control_topic: impl Into<String>) -> Self {
        Self {
            bus,
            cache,
            control_topic: control_topic.into(),
            subscribed: Mutex::new(BTreeSet::new()),
        }
    }

    /// Subscribes to every cached topic and the control topic.
    pub async fn start(&self) {
        let mut subscribed = self.subscribed.lock().await;
        self.catch_up(&mut subscribed).await;
    }

    /// Forgets all subscriptions and subscribes again from scratch. Needed when the broker
    /// started a new session and dropped what we had.
    pub async fn reset(&self) {
        let mut subscribed = self.subscribed.lock().await;
        subscribed.clear();
        self.catch_up(&mut subscribed).await;
    }

    /// Resubscribes on every broker connect until the connection is dropped.
    pub async fn follow_sessions(&self, mut sessions: watch::Receiver<MqttSession>) {
        loop {
            let session = *sessions.borrow_and_update();

            if session.generation > 0 {
                if session.resumed {
                    self.start().await;
                } else {
                    tracing::info!("Broker started a new session, subscribing to all topics again");
                    self.reset().await;
                }

                tracing::info!(
                    "Subscribed to {} of {} tracked topics",
                    self.subscribed_topics().await.len(),
                    self.cache.len()
                );
            }

            if sessions.changed().await.is_err() {
                return;
            }
        }
    }

    #[tracing::instrument(skip_all, fields(added = diff.added().len(), removed = diff.removed().len()))]
    pub async fn apply(&self, diff: &TopicDiff) {
        if diff.is_empty() {
            tracing::debug!("No topic changes, checking for pending subscriptions only");
        }

        let mut subscribed = self.subscribed.lock().await;

        for topic in diff.removed() {
            if topic == &self.control_topic {
                continue;
            }

            if subscribed.contains(topic) {
                match self.bus.unsubscribe(topic).await {
                    Ok(()) => {
                        subscribed.remove(topic);
                    }
                    Err(e) => tracing::error!("Error unsubscribing from {}: {:?}", topic, e),
                }
            }

            if self.cache.try_remove(topic) {
                tracing::debug!("Stopped tracking {}", topic);
            }
        }

        for topic in diff.added() {
            if self.cache.try_add(topic.as_str(), "") {
                tracing::debug!("Started tracking {}", topic);
            }

            if !subscribed.contains(topic) {
                self.subscribe(&mut subscribed, topic).await;
            }
        }

        self.catch_up(&mut subscribed).await;
    }

    pub async fn subscribed_topics(&self) -> BTreeSet<String> {
        self.subscribed.lock().await.clone()
    }

    // Subscribes to tracked topics that are missing and drops subscriptions nobody tracks.
    async fn catch_up(&self, subscribed: &mut BTreeSet<String>) {
        let mut desired = self.cache.keys();
        desired.insert(self.control_topic.clone());

        let missing: Vec<String> = desired.difference(subscribed).cloned().collect();
        let stale: Vec<String> = subscribed.difference(&desired).cloned().collect();

        for topic in missing {
            self.subscribe(subscribed, &topic).await;
        }

        for topic in stale {
            match self.bus.unsubscribe(&topic).await {
                Ok(()) => {
                    subscribed.remove(&topic);
                }
                Err(e) => tracing::error!("Error unsubscribing from stale topic {}: {:?}", topic, e),
            }
        }
    }

    async fn subscribe(&self, subscribed: &mut BTreeSet<String>, topic: &str) {
        match self.bus.subscribe(topic).await {
            Ok(()) => {
                subscribed.insert(topic.to_string());
            }
            Err(e) => tracing::error!("Error subscribing to {}: {:?}", topic, e),
        }
    }
}
