use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::FulfillmentError;
use crate::command::{DeviceRef, ExecuteCommand};

pub const SYNC: &str = "action.devices.SYNC";
pub const QUERY: &str = "action.devices.QUERY";
pub const EXECUTE: &str = "action.devices.EXECUTE";
pub const DISCONNECT: &str = "action.devices.DISCONNECT";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentRequest {
    pub request_id: String,
    #[serde(default)]
    pub inputs: Vec<IntentInput>,
}

/// The payload shape depends on the intent and is parsed once the intent is known.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentInput {
    pub intent: String,
    #[serde(default)]
    pub payload: Value,
}

impl IntentInput {
    pub(super) fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, FulfillmentError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| FulfillmentError::MalformedPayload {
            intent: self.intent.clone(),
            source,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct QueryPayload {
    pub devices: Vec<DeviceRef>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ExecutePayload {
    pub commands: Vec<ExecuteCommand>,
}
