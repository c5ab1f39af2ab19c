use serde_json::{Map, Value};

use super::StateCache;
use crate::command::unflatten;
use crate::device::Device;

/// Current assistant-facing state of a device, built from the cache.
///
/// Keys without a received value are left out. So are values the value map cannot convert,
/// those are logged.
pub fn device_states(device: &Device, cache: &StateCache) -> Map<String, Value> {
    let mut flat = vec![];

    for field in device.state_fields() {
        let payload = match cache.get(&field.state.topic) {
            Some(payload) if !payload.is_empty() => payload,
            _ => continue,
        };

        match field.state.to_assistant_value(&payload) {
            Ok(value) => flat.push((field.key.to_string(), value)),
            Err(e) => {
                tracing::warn!(
                    "Cannot report {} of device {} from {}: {}",
                    field.key,
                    device.id,
                    field.state.topic,
                    e
                );
            }
        }
    }

    unflatten(flat)
}
