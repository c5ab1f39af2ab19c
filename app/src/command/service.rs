use std::sync::Arc;

use infrastructure::meter;

use super::{ExecuteCommand, Execution, map_execution};
use crate::device::{Device, DeviceStore};
use crate::mqtt::MqttBus;

/// Turns EXECUTE commands into bus publications.
pub struct CommandService<B: MqttBus> {
    devices: Arc<DeviceStore>,
    bus: B,
}

impl<B: MqttBus> CommandService<B> {
    pub fn new(devices: Arc<DeviceStore>, bus: B) -> Self {
        Self { devices, bus }
    }

    /// Returns the number of successful publications. Unknown and disabled devices are skipped
    /// without affecting the other devices of the same command.
    #[tracing::instrument(skip_all)]
    pub async fn execute(&self, commands: &[ExecuteCommand]) -> usize {
        let registry = self.devices.snapshot();
        let mut published = 0;

        for command in commands {
            for target in command.devices.iter() {
                let device = match registry.get(&target.id) {
                    Ok(device) => device,
                    Err(e) => {
                        tracing::warn!("Skipping command: {}", e);
                        continue;
                    }
                };

                if !device.is_enabled() {
                    tracing::info!("Skipping command for disabled device {}", device.id);
                    continue;
                }

                for execution in command.execution.iter() {
                    published += self.execute_on(device, execution).await;
                }
            }
        }

        published
    }

    async fn execute_on(&self, device: &Device, execution: &Execution) -> usize {
        let publications = match map_execution(device, execution) {
            Ok(publications) => publications,
            Err(e) => {
                tracing::error!("Rejecting {} for device {}: {}", execution.command, device.id, e);
                return 0;
            }
        };

        let results = futures::future::join_all(
            publications
                .iter()
                .map(|publication| self.bus.publish(&publication.topic, &publication.payload)),
        )
        .await;

        let mut published = 0;
        for (publication, result) in publications.iter().zip(results) {
            match result {
                Ok(()) => {
                    tracing::info!(
                        "Executed {} on {}: {} -> {}",
                        execution.command,
                        device.id,
                        publication.topic,
                        publication.payload
                    );
                    meter::increment("gbridge_command_published", &[("device", device.id.as_str())]);
                    published += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "Error publishing {} for device {} to {}: {:?}",
                        execution.command,
                        device.id,
                        publication.topic,
                        e
                    );
                }
            }
        }

        published
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::device::test;
    use crate::mqtt::test::RecordingBus;

    fn service(bus: &RecordingBus) -> CommandService<RecordingBus> {
        CommandService::new(Arc::new(DeviceStore::new(test::registry())), bus.clone())
    }

    fn on_off(device_ids: &[&str], on: bool) -> Vec<ExecuteCommand> {
        let devices: Vec<_> = device_ids.iter().map(|id| json!({ "id": id })).collect();

        serde_json::from_value(json!([{
            "devices": devices,
            "execution": [{ "command": "action.devices.commands.OnOff", "params": { "on": on } }]
        }]))
        .unwrap()
    }

    #[tokio::test]
    async fn test_execute_publishes_mapped_payload() {
        let bus = RecordingBus::default();

        let published = service(&bus).execute(&on_off(&["light1"], true)).await;

        assert_eq!(published, 1);
        assert_eq!(bus.published(), vec![("home/light1/set".to_string(), "ON".to_string())]);
    }

    #[tokio::test]
    async fn test_disabled_device_produces_no_publish() {
        let bus = RecordingBus::default();

        let published = service(&bus).execute(&on_off(&["heater"], true)).await;

        assert_eq!(published, 0);
        assert!(bus.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_device_does_not_stop_other_devices() {
        let bus = RecordingBus::default();

        let published = service(&bus).execute(&on_off(&["garage", "light1"], false)).await;

        assert_eq!(published, 1);
        assert_eq!(bus.published(), vec![("home/light1/set".to_string(), "OFF".to_string())]);
    }

    #[tokio::test]
    async fn test_failed_publish_is_not_counted() {
        let bus = RecordingBus::default();
        bus.fail_topic("home/light1/set");

        let published = service(&bus).execute(&on_off(&["light1"], true)).await;

        assert_eq!(published, 0);
    }

    #[tokio::test]
    async fn test_invalid_value_rejects_execution() {
        let bus = RecordingBus::default();
        let commands: Vec<ExecuteCommand> = serde_json::from_value(json!([{
            "devices": [{ "id": "fan" }],
            "execution": [{ "command": "action.devices.commands.SetFanSpeed", "params": { "fanSpeed": "turbo" } }]
        }]))
        .unwrap();

        let published = service(&bus).execute(&commands).await;

        assert_eq!(published, 0);
        assert!(bus.calls().is_empty());
    }
}
