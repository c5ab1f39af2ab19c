use std::sync::Arc;

use infrastructure::{MqttInMessage, MqttSubscription, meter};
use tokio::task::JoinHandle;

use crate::device::DeviceStore;
use crate::event::{EventRouter, SyncReason, SyncRequested};
use crate::homegraph::HomeGraph;
use crate::state::StateCache;

/// Consumes bus messages: keeps the state cache current, reports changed device state and
/// turns messages on the control topic into sync requests.
pub struct GatewayRunner<H: HomeGraph> {
    cache: StateCache,
    devices: Arc<DeviceStore>,
    router: EventRouter,
    homegraph: Arc<H>,
    control_topic: String,
}

impl<H: HomeGraph> GatewayRunner<H> {
    pub fn new(
        cache: StateCache,
        devices: Arc<DeviceStore>,
        router: EventRouter,
        homegraph: Arc<H>,
        control_topic: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            devices,
            router,
            homegraph,
            control_topic: control_topic.into(),
        }
    }

    pub async fn run(self, mut subscription: MqttSubscription) {
        while let Some(msg) = subscription.recv().await {
            self.handle_message(msg);
        }

        tracing::warn!("MQTT subscription closed, gateway stopped");
    }

    /// Returns the task pushing the new state, if there is anything to push.
    #[tracing::instrument(skip_all, fields(topic = %msg.topic))]
    pub fn handle_message(&self, msg: MqttInMessage) -> Option<JoinHandle<()>> {
        if msg.topic == self.control_topic {
            tracing::info!("Sync requested via {}", msg.topic);
            self.router.publish(SyncRequested {
                reason: SyncReason::ControlTopic,
            });
            return None;
        }

        let previous = match self.cache.update(&msg.topic, &msg.payload) {
            Some(previous) => previous,
            None => {
                tracing::trace!("Ignoring message on untracked topic {}", msg.topic);
                return None;
            }
        };

        meter::increment("gbridge_state_received", &[("topic", msg.topic.as_str())]);

        if previous == msg.payload {
            return None;
        }

        let devices = self.devices.snapshot().devices_reporting_topic(&msg.topic);
        if devices.is_empty() {
            return None;
        }

        let homegraph = self.homegraph.clone();
        let cache = self.cache.clone();
        let topic = msg.topic;

        Some(tokio::spawn(async move {
            if let Err(e) = homegraph.send_state_updates(&devices, &cache).await {
                tracing::error!("Error reporting state change of {}: {:?}", topic, e);
            }
        }))
    }
}
