use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;

use super::{Device, DeviceRegistry, TraitType};

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum DeviceConfigError {
    #[display("Device configuration is not valid JSON: {message}")]
    Parse { message: String },

    #[display("Device id must not be empty")]
    EmptyId,

    #[display("Device registered under {key} declares id {id}")]
    KeyMismatch { key: String, id: String },

    #[display("Device {id} is declared more than once")]
    DuplicateDevice { id: String },

    #[display("Device {device_id} declares {trait_type} more than once")]
    DuplicateTrait { device_id: String, trait_type: TraitType },

    #[display("Device {device_id} has an empty topic for {field}")]
    EmptyTopic { device_id: String, field: String },

    #[display("Device {device_id} has an invalid value map for {state_key}: {reason}")]
    InvalidValueMap {
        device_id: String,
        state_key: String,
        reason: String,
    },

    #[display("Topic {topic} is added and removed at the same time")]
    ContradictoryDiff { topic: String },
}

impl DeviceRegistry {
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Error reading device configuration {}", path.display()))?;

        let registry = Self::from_json(&json)
            .with_context(|| format!("Invalid device configuration {}", path.display()))?;

        tracing::info!("Loaded {} devices from {}", registry.len(), path.display());
        Ok(registry)
    }

    /// Parses the device file, a JSON object keyed by device id.
    pub fn from_json(json: &str) -> Result<Self, DeviceConfigError> {
        let devices: BTreeMap<String, Device> =
            serde_json::from_str(json).map_err(|e| DeviceConfigError::Parse { message: e.to_string() })?;

        for (key, device) in devices.iter() {
            if *key != device.id {
                return Err(DeviceConfigError::KeyMismatch {
                    key: key.clone(),
                    id: device.id.clone(),
                });
            }
        }

        Self::new(devices.into_values())
    }

    pub fn new(devices: impl IntoIterator<Item = Device>) -> Result<Self, DeviceConfigError> {
        let mut registry = BTreeMap::new();

        for device in devices {
            validate(&device)?;

            if registry.contains_key(&device.id) {
                return Err(DeviceConfigError::DuplicateDevice { id: device.id });
            }

            registry.insert(device.id.clone(), Arc::new(device));
        }

        Ok(Self { devices: registry })
    }
}

fn validate(device: &Device) -> Result<(), DeviceConfigError> {
    if device.id.trim().is_empty() {
        return Err(DeviceConfigError::EmptyId);
    }

    let mut seen_traits = HashSet::new();
    for device_trait in device.traits.iter() {
        if !seen_traits.insert(device_trait.trait_type) {
            return Err(DeviceConfigError::DuplicateTrait {
                device_id: device.id.clone(),
                trait_type: device_trait.trait_type,
            });
        }
    }

    if let Some(param) = device.command_params().find(|p| p.topic.trim().is_empty()) {
        return Err(DeviceConfigError::EmptyTopic {
            device_id: device.id.clone(),
            field: format!("{}/{}", param.command, param.param),
        });
    }

    for field in device.state_fields() {
        if field.state.topic.trim().is_empty() {
            return Err(DeviceConfigError::EmptyTopic {
                device_id: device.id.clone(),
                field: field.key.to_string(),
            });
        }

        field
            .state
            .value_map
            .validate()
            .map_err(|reason| DeviceConfigError::InvalidValueMap {
                device_id: device.id.clone(),
                state_key: field.key.to_string(),
                reason,
            })?;
    }

    Ok(())
}
