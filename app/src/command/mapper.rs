use std::borrow::Cow;
use std::collections::BTreeMap;

use super::{Execution, MappingError, Publication, params::flatten};
use crate::device::{Device, DeviceTrait, scalar_to_string};

/// Command parameters whose name differs from the state key holding the same value.
/// Modes and toggles are named per setting, so only the prefix is renamed.
const PREFIX_RENAMES: &[(&str, &str)] = &[
    ("updateModeSettings.", "currentModeSettings."),
    ("updateToggleSettings.", "currentToggleSettings."),
];

const RENAMES: &[(&str, &str)] = &[
    ("fanSpeed", "currentFanSpeedSetting"),
    ("fanSpeedPercent", "currentFanSpeedPercent"),
];

pub fn canonical_state_key(param: &str) -> Cow<'_, str> {
    if let Some((_, state_key)) = RENAMES.iter().find(|(name, _)| *name == param) {
        return Cow::Borrowed(*state_key);
    }

    for (command_prefix, state_prefix) in PREFIX_RENAMES {
        if let Some(setting) = param.strip_prefix(command_prefix) {
            return Cow::Owned(format!("{}{}", state_prefix, setting));
        }
    }

    Cow::Borrowed(param)
}

/// Topics and payloads to publish for one execution on one device.
///
/// An execution the device does not support yields nothing. A supported parameter without a
/// matching state is published as its raw string form.
pub fn map_execution(device: &Device, execution: &Execution) -> Result<Vec<Publication>, MappingError> {
    let supported = supported_params(device, &execution.command);
    if supported.is_empty() {
        tracing::debug!("Device {} does not support {}", device.id, execution.command);
        return Ok(vec![]);
    }

    let mut publications = vec![];

    for (key, value) in flatten(&execution.params)? {
        let Some((device_trait, topic)) = supported.get(key.as_str()) else {
            tracing::debug!("Ignoring parameter {} of {} for device {}", key, execution.command, device.id);
            continue;
        };

        let state_key = canonical_state_key(&key);

        let payload = match device_trait.state.get(state_key.as_ref()) {
            Some(state) => state.to_bus_payload(&value),
            None => {
                tracing::warn!(
                    "No state {} in {} of device {}, publishing raw value of {}",
                    state_key,
                    device_trait.trait_type,
                    device.id,
                    key
                );
                scalar_to_string(&value)
            }
        }
        .map_err(|source| MappingError::Value {
            device_id: device.id.clone(),
            key: key.clone(),
            source,
        })?;

        publications.push(Publication {
            topic: topic.to_string(),
            payload,
        });
    }

    Ok(publications)
}

// Parameters of `command` merged across all traits. The first trait declaring a parameter wins.
fn supported_params<'a>(device: &'a Device, command: &str) -> BTreeMap<&'a str, (&'a DeviceTrait, &'a str)> {
    let mut supported = BTreeMap::new();

    for device_trait in device.traits.iter() {
        let Some(params) = device_trait.commands.get(command) else {
            continue;
        };

        for (param, topic) in params {
            supported
                .entry(param.as_str())
                .or_insert((device_trait, topic.as_str()));
        }
    }

    supported
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::device::{DeviceRegistry, ValueMapError, test};

    fn execution(command: &str, params: Value) -> Execution {
        serde_json::from_value(json!({ "command": command, "params": params })).unwrap()
    }

    fn publish(topic: &str, payload: &str) -> Publication {
        Publication {
            topic: topic.to_string(),
            payload: payload.to_string(),
        }
    }

    fn map(registry: &DeviceRegistry, device_id: &str, execution: Execution) -> Result<Vec<Publication>, MappingError> {
        map_execution(registry.get(device_id).unwrap(), &execution)
    }

    #[test]
    fn test_on_off_uses_boolean_value_map() {
        let registry = test::registry();

        let result = map(
            &registry,
            "light1",
            execution("action.devices.commands.OnOff", json!({ "on": true })),
        );

        assert_eq!(result, Ok(vec![publish("home/light1/set", "ON")]));
    }

    #[test]
    fn test_brightness_is_scaled_to_bus_range() {
        let registry = test::registry();

        let result = map(
            &registry,
            "light1",
            execution("action.devices.commands.BrightnessAbsolute", json!({ "brightness": 50 })),
        );

        assert_eq!(result, Ok(vec![publish("home/light1/brightness/set", "128")]));
    }

    #[test]
    fn test_mode_setting_resolves_current_mode_state() {
        let registry = test::registry();

        let result = map(
            &registry,
            "washer",
            execution(
                "action.devices.commands.SetModes",
                json!({ "updateModeSettings": { "load": "large" } }),
            ),
        );

        assert_eq!(result, Ok(vec![publish("washer/load/set", "L")]));
    }

    #[test]
    fn test_fan_speed_resolves_current_setting_state() {
        let registry = test::registry();

        let result = map(
            &registry,
            "fan",
            execution("action.devices.commands.SetFanSpeed", json!({ "fanSpeed": "high" })),
        );

        assert_eq!(result, Ok(vec![publish("fan/speed/set", "2")]));
    }

    #[test]
    fn test_missing_state_falls_back_to_raw_value() {
        let registry = test::registry();

        let result = map(
            &registry,
            "washer",
            execution(
                "action.devices.commands.SetToggles",
                json!({ "updateToggleSettings": { "turbo": true } }),
            ),
        );

        assert_eq!(result, Ok(vec![publish("washer/turbo/set", "true")]));
    }

    #[test]
    fn test_unsupported_command_is_ignored() {
        let registry = test::registry();

        let result = map(
            &registry,
            "fan",
            execution("action.devices.commands.OnOff", json!({ "on": true })),
        );

        assert_eq!(result, Ok(vec![]));
    }

    #[test]
    fn test_unknown_parameters_are_ignored() {
        let registry = test::registry();

        let result = map(
            &registry,
            "light1",
            execution("action.devices.commands.OnOff", json!({ "on": false, "followUpToken": "abc" })),
        );

        assert_eq!(result, Ok(vec![publish("home/light1/set", "OFF")]));
    }

    #[test]
    fn test_value_missing_from_enumerated_table_is_an_error() {
        let registry = test::registry();

        let result = map(
            &registry,
            "washer",
            execution(
                "action.devices.commands.SetModes",
                json!({ "updateModeSettings": { "load": "medium" } }),
            ),
        );

        assert_eq!(
            result,
            Err(MappingError::Value {
                device_id: "washer".to_string(),
                key: "updateModeSettings.load".to_string(),
                source: ValueMapError::UnmappedAssistantValue {
                    value: "\"medium\"".to_string()
                },
            })
        );
    }

    #[test]
    fn test_canonical_state_keys() {
        assert_eq!(canonical_state_key("updateModeSettings.load"), "currentModeSettings.load");
        assert_eq!(canonical_state_key("updateToggleSettings.turbo"), "currentToggleSettings.turbo");
        assert_eq!(canonical_state_key("fanSpeed"), "currentFanSpeedSetting");
        assert_eq!(canonical_state_key("fanSpeedPercent"), "currentFanSpeedPercent");
        assert_eq!(canonical_state_key("brightness"), "brightness");
        assert_eq!(canonical_state_key("updateModeSettings"), "updateModeSettings");
    }
}
