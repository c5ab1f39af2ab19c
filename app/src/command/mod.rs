mod mapper;
mod params;
mod service;

pub use mapper::map_execution;
pub use params::unflatten;
pub use service::CommandService;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device::ValueMapError;

/// One entry of an EXECUTE intent: the same executions are applied to every listed device.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExecuteCommand {
    pub devices: Vec<DeviceRef>,
    pub execution: Vec<Execution>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Execution {
    pub command: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error)]
pub enum MappingError {
    #[display("Parameter {key} has an array value, which cannot be mapped to a topic")]
    UnsupportedParameter { key: String },

    #[display("Parameter {key} is given more than once")]
    DuplicateParameter { key: String },

    #[display("Parameter {key} of device {device_id} cannot be mapped: {source}")]
    Value {
        device_id: String,
        key: String,
        source: ValueMapError,
    },
}
