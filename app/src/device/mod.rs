mod config;
mod store;
mod trait_type;
mod value_map;

pub use config::DeviceConfigError;
pub use store::{DeviceStore, TopicDiff};
pub use trait_type::TraitType;
pub use value_map::{GoogleType, ValueMap, ValueMapError, scalar_to_string};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub will_report_state: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_hint: Option<String>,
    #[serde(default)]
    pub name: DeviceName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Value>,
    /// Device-wide attributes, merged with the attributes of each trait on sync.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub traits: Vec<DeviceTrait>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceName {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_names: Vec<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nicknames: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hw_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceTrait {
    #[serde(rename = "trait")]
    pub trait_type: TraitType,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    /// command name -> parameter name -> topic to publish to
    #[serde(default)]
    pub commands: BTreeMap<String, BTreeMap<String, String>>,
    /// state key -> where and how the value lives on the bus
    #[serde(default)]
    pub state: BTreeMap<String, DeviceState>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub topic: String,
    #[serde(default)]
    pub google_type: GoogleType,
    #[serde(default)]
    pub value_map: ValueMap,
}

impl DeviceState {
    pub fn to_bus_payload(&self, value: &Value) -> Result<String, ValueMapError> {
        self.value_map.to_bus(value)
    }

    pub fn to_assistant_value(&self, payload: &str) -> Result<Value, ValueMapError> {
        self.value_map.to_assistant(payload, self.google_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandParam<'a> {
    pub trait_type: TraitType,
    pub command: &'a str,
    pub param: &'a str,
    pub topic: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateField<'a> {
    pub trait_type: TraitType,
    pub key: &'a str,
    pub state: &'a DeviceState,
}

impl Device {
    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    pub fn command_params(&self) -> impl Iterator<Item = CommandParam<'_>> {
        self.traits.iter().flat_map(|t| {
            t.commands.iter().flat_map(move |(command, params)| {
                params.iter().map(move |(param, topic)| CommandParam {
                    trait_type: t.trait_type,
                    command,
                    param,
                    topic,
                })
            })
        })
    }

    pub fn state_fields(&self) -> impl Iterator<Item = StateField<'_>> {
        self.traits.iter().flat_map(|t| {
            t.state.iter().map(move |(key, state)| StateField {
                trait_type: t.trait_type,
                key,
                state,
            })
        })
    }

    pub fn references_state_topic(&self, topic: &str) -> bool {
        self.state_fields().any(|field| field.state.topic == topic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum DeviceLookupError {
    #[display("Device {id} not found")]
    NotFound { id: String },
}

/// One generation of the device configuration. Never mutated, replaced as a whole on reload.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Arc<Device>>,
}

impl DeviceRegistry {
    pub fn get(&self, id: &str) -> Result<&Arc<Device>, DeviceLookupError> {
        self.devices
            .get(id)
            .ok_or_else(|| DeviceLookupError::NotFound { id: id.to_string() })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.iter().filter(|d| d.is_enabled())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// All state topics of all devices. Disabled devices are still monitored.
    pub fn state_topics(&self) -> BTreeSet<String> {
        self.iter()
            .flat_map(|d| d.state_fields().map(|f| f.state.topic.clone()))
            .collect()
    }

    /// Devices that want a state report when `topic` changes.
    pub fn devices_reporting_topic(&self, topic: &str) -> Vec<Arc<Device>> {
        self.enabled()
            .filter(|d| d.will_report_state && d.references_state_topic(topic))
            .cloned()
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_unknown_device_fails() {
        let registry = test::registry();

        assert!(registry.get("light1").is_ok());
        assert_eq!(
            registry.get("garage").err(),
            Some(DeviceLookupError::NotFound {
                id: "garage".to_string()
            })
        );
    }

    #[test]
    fn test_command_params_follow_trait_order() {
        let registry = test::registry();
        let light = registry.get("light1").unwrap();

        let params: Vec<_> = light.command_params().map(|p| (p.trait_type, p.param, p.topic)).collect();

        assert_eq!(
            params,
            vec![
                (TraitType::OnOff, "on", "home/light1/set"),
                (TraitType::Brightness, "brightness", "home/light1/brightness/set"),
            ]
        );
    }

    #[test]
    fn test_state_topics_include_disabled_devices() {
        let topics = test::registry().state_topics();

        assert!(topics.contains("heater/state"));
        assert!(topics.contains("home/light1"));
        assert!(!topics.contains("home/light1/set"));
        assert_eq!(topics.len(), 5);
    }

    #[test]
    fn test_reporting_devices_exclude_disabled_and_non_reporting() {
        let registry = test::registry();

        let ids = |topic: &str| -> Vec<String> {
            registry
                .devices_reporting_topic(topic)
                .iter()
                .map(|d| d.id.clone())
                .collect()
        };

        assert_eq!(ids("home/light1"), vec!["light1".to_string()]);
        assert!(ids("fan/speed").is_empty());
        assert!(ids("heater/state").is_empty());
    }
}
