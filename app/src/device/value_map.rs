use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the assistant expects a value whose bus payload is passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GoogleType {
    Bool,
    Numeric,
    #[default]
    String,
}

/// Rule converting between assistant values and bus payloads for a single state key.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ValueMap {
    #[default]
    Identity,
    Enumerated {
        values: Vec<EnumeratedValue>,
    },
    #[serde(rename_all = "camelCase")]
    Range {
        assistant_min: f64,
        assistant_max: f64,
        bus_min: f64,
        bus_max: f64,
    },
    Boolean {
        on: String,
        off: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EnumeratedValue {
    pub assistant: Value,
    pub bus: String,
}

#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error)]
pub enum ValueMapError {
    #[display("Assistant value {value} is not covered by the value map")]
    UnmappedAssistantValue { value: String },

    #[display("Bus payload {payload:?} is not covered by the value map")]
    UnmappedBusValue { payload: String },

    #[display("Expected a {expected} value but got {value}")]
    TypeMismatch { expected: &'static str, value: String },

    #[display("Value {value} is outside of [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
}

impl ValueMap {
    /// Payload to publish for a value sent by the assistant.
    pub fn to_bus(&self, value: &Value) -> Result<String, ValueMapError> {
        match self {
            ValueMap::Identity => scalar_to_string(value),
            ValueMap::Enumerated { values } => values
                .iter()
                .find(|v| v.assistant == *value)
                .map(|v| v.bus.clone())
                .ok_or_else(|| ValueMapError::UnmappedAssistantValue {
                    value: value.to_string(),
                }),
            ValueMap::Range {
                assistant_min,
                assistant_max,
                bus_min,
                bus_max,
            } => {
                let number = value.as_f64().ok_or_else(|| type_mismatch("numeric", value))?;
                let scaled = rescale(number, (*assistant_min, *assistant_max), (*bus_min, *bus_max))?;
                Ok(scaled.to_string())
            }
            ValueMap::Boolean { on, off } => match value.as_bool() {
                Some(true) => Ok(on.clone()),
                Some(false) => Ok(off.clone()),
                None => Err(type_mismatch("bool", value)),
            },
        }
    }

    /// Assistant value for a payload received from the bus.
    pub fn to_assistant(&self, payload: &str, google_type: GoogleType) -> Result<Value, ValueMapError> {
        match self {
            ValueMap::Identity => typed_value(payload, google_type),
            ValueMap::Enumerated { values } => values
                .iter()
                .find(|v| v.bus == payload)
                .map(|v| v.assistant.clone())
                .ok_or_else(|| unmapped_payload(payload)),
            ValueMap::Range {
                assistant_min,
                assistant_max,
                bus_min,
                bus_max,
            } => {
                let number: f64 = payload.trim().parse().map_err(|_| ValueMapError::TypeMismatch {
                    expected: "numeric",
                    value: payload.to_string(),
                })?;
                let scaled = rescale(number, (*bus_min, *bus_max), (*assistant_min, *assistant_max))?;
                Ok(Value::from(scaled))
            }
            ValueMap::Boolean { on, off } => {
                if payload == on {
                    Ok(Value::Bool(true))
                } else if payload == off {
                    Ok(Value::Bool(false))
                } else {
                    Err(unmapped_payload(payload))
                }
            }
        }
    }

    /// Problems that make the map unusable in at least one direction.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ValueMap::Identity => Ok(()),
            ValueMap::Enumerated { values } => {
                if values.is_empty() {
                    return Err("enumerated value map without values".to_string());
                }

                for (i, value) in values.iter().enumerate() {
                    let later = &values[i + 1..];
                    if later.iter().any(|v| v.assistant == value.assistant) {
                        return Err(format!("assistant value {} is mapped twice", value.assistant));
                    }
                    if later.iter().any(|v| v.bus == value.bus) {
                        return Err(format!("bus value {:?} is mapped twice", value.bus));
                    }
                }

                Ok(())
            }
            ValueMap::Range {
                assistant_min,
                assistant_max,
                bus_min,
                bus_max,
            } => {
                if assistant_min == assistant_max || bus_min == bus_max {
                    Err("range value map with empty range".to_string())
                } else {
                    Ok(())
                }
            }
            ValueMap::Boolean { on, off } => {
                if on == off {
                    Err(format!("boolean value map uses {:?} for both states", on))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// String form of a scalar parameter, used whenever no value map applies.
pub fn scalar_to_string(value: &Value) -> Result<String, ValueMapError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        Value::Bool(_) | Value::Number(_) => Ok(value.to_string()),
        Value::Array(_) | Value::Object(_) => Err(type_mismatch("scalar", value)),
    }
}

fn typed_value(payload: &str, google_type: GoogleType) -> Result<Value, ValueMapError> {
    match google_type {
        GoogleType::String => Ok(Value::String(payload.to_string())),
        GoogleType::Bool => match payload.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Ok(Value::Bool(true)),
            "false" | "off" | "0" => Ok(Value::Bool(false)),
            _ => Err(ValueMapError::TypeMismatch {
                expected: "bool",
                value: payload.to_string(),
            }),
        },
        GoogleType::Numeric => {
            let mismatch = || ValueMapError::TypeMismatch {
                expected: "numeric",
                value: payload.to_string(),
            };

            let number: f64 = payload.trim().parse().map_err(|_| mismatch())?;
            if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
                Ok(Value::from(number as i64))
            } else {
                serde_json::Number::from_f64(number).map(Value::Number).ok_or_else(mismatch)
            }
        }
    }
}

// Linear mapping from one interval onto another, rounded to the nearest integer.
fn rescale(value: f64, from: (f64, f64), to: (f64, f64)) -> Result<i64, ValueMapError> {
    let (min, max) = (from.0.min(from.1), from.0.max(from.1));
    if !(min..=max).contains(&value) {
        return Err(ValueMapError::OutOfRange { value, min, max });
    }

    let ratio = (value - from.0) / (from.1 - from.0);
    Ok((to.0 + ratio * (to.1 - to.0)).round() as i64)
}

fn type_mismatch(expected: &'static str, value: &Value) -> ValueMapError {
    ValueMapError::TypeMismatch {
        expected,
        value: value.to_string(),
    }
}

fn unmapped_payload(payload: &str) -> ValueMapError {
    ValueMapError::UnmappedBusValue {
        payload: payload.to_string(),
    }
}
