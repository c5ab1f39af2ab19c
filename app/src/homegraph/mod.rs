mod client;
mod retry;

pub use client::HomeGraphClient;
pub use retry::RetryConfig;

use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::device::Device;
use crate::state::{StateCache, device_states};

/// Outgoing calls to the assistant's device graph.
pub trait HomeGraph: Send + Sync + 'static {
    /// Asks the assistant to fetch the device list again.
    fn request_sync(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Pushes the current cached state of the given devices in one report.
    fn send_state_updates(
        &self,
        devices: &[Arc<Device>],
        cache: &StateCache,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

pub fn request_sync_body(agent_user_id: &str) -> Value {
    json!({
        "agentUserId": agent_user_id,
        "async": true,
    })
}

pub fn report_state_body(
    request_id: &str,
    agent_user_id: &str,
    devices: &[Arc<Device>],
    cache: &StateCache,
) -> Value {
    let states: Map<String, Value> = devices
        .iter()
        .map(|device| {
            let mut states = device_states(device, cache);
            states.insert("online".to_string(), Value::Bool(true));
            (device.id.clone(), Value::Object(states))
        })
        .collect();

    json!({
        "requestId": request_id,
        "agentUserId": agent_user_id,
        "payload": {
            "devices": {
                "states": states,
            },
        },
    })
}
