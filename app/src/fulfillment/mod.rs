mod intent;

use std::sync::Arc;

use actix_web::{HttpResponse, ResponseError, web};
use derive_more::derive::{Display, Error};
use infrastructure::TraceContext;
use serde_json::{Value, json};

use crate::command::ExecuteCommand;
use crate::device::{DeviceRegistry, DeviceStore};
use crate::event::{CommandReceived, EventRouter};
use crate::state::StateCache;
use intent::{ExecutePayload, FulfillmentRequest, QueryPayload};

pub struct FulfillmentState {
    pub devices: Arc<DeviceStore>,
    pub cache: StateCache,
    pub router: EventRouter,
    pub agent_user_id: String,
}

pub fn routes(state: FulfillmentState) -> actix_web::Scope {
    web::scope("/google")
        .route("/fulfillment", web::post().to(fulfillment_handler))
        .app_data(web::Data::new(state))
}

#[derive(Debug, Error, Display)]
enum FulfillmentError {
    #[display("Request contains no intent")]
    NoIntent,

    #[display("Malformed payload for {intent}")]
    MalformedPayload { intent: String, source: serde_json::Error },
}

impl ResponseError for FulfillmentError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        tracing::warn!("FulfillmentError: {:?}", self);
        actix_web::http::StatusCode::BAD_REQUEST
    }
}

#[tracing::instrument(skip_all, fields(request_id = %request.request_id))]
async fn fulfillment_handler(
    state: web::Data<FulfillmentState>,
    request: web::Json<FulfillmentRequest>,
) -> Result<HttpResponse, FulfillmentError> {
    let response = handle(&state, request.into_inner())?;
    Ok(HttpResponse::Ok().json(response))
}

fn handle(state: &FulfillmentState, request: FulfillmentRequest) -> Result<Value, FulfillmentError> {
    // The assistant only ever sends a single input per request
    let input = request.inputs.into_iter().next().ok_or(FulfillmentError::NoIntent)?;
    let registry = state.devices.snapshot();

    tracing::info!("Handling {}", input.intent);

    let response = match input.intent.as_str() {
        intent::SYNC => sync_response(&request.request_id, &state.agent_user_id, &registry),
        intent::QUERY => {
            let payload: QueryPayload = input.parse_payload()?;
            let ids: Vec<&str> = payload.devices.iter().map(|d| d.id.as_str()).collect();
            query_response(&request.request_id, &ids, &registry, &state.cache)
        }
        intent::EXECUTE => {
            let payload: ExecutePayload = input.parse_payload()?;
            let response = execute_response(&request.request_id, &payload.commands, &registry);

            state.router.publish(CommandReceived {
                commands: payload.commands,
                correlation_id: TraceContext::current_correlation_id(),
            });

            response
        }
        intent::DISCONNECT => json!({}),
        other => {
            tracing::warn!("Unsupported intent {}", other);
            json!({
                "requestId": request.request_id,
                "payload": { "errorCode": "notSupported" },
            })
        }
    };

    Ok(response)
}

pub fn sync_response(request_id: &str, agent_user_id: &str, registry: &DeviceRegistry) -> Value {
    let devices: Vec<Value> = registry
        .enabled()
        .map(|device| {
            let mut attributes = device.attributes.clone();
            for t in device.traits.iter() {
                attributes.extend(t.attributes.clone());
            }

            let mut entry = json!({
                "id": device.id,
                "type": device.device_type,
                "traits": device.traits.iter().map(|t| t.trait_type.to_string()).collect::<Vec<_>>(),
                "name": device.name,
                "willReportState": device.will_report_state,
                "attributes": attributes,
            });

            if let Value::Object(entry) = &mut entry {
                if let Some(room_hint) = &device.room_hint {
                    entry.insert("roomHint".to_string(), json!(room_hint));
                }
                if let Some(device_info) = &device.device_info {
                    entry.insert("deviceInfo".to_string(), json!(device_info));
                }
                if let Some(custom_data) = &device.custom_data {
                    entry.insert("customData".to_string(), custom_data.clone());
                }
            }

            entry
        })
        .collect();

    json!({
        "requestId": request_id,
        "payload": {
            "agentUserId": agent_user_id,
            "devices": devices,
        },
    })
}

pub fn query_response(request_id: &str, ids: &[&str], registry: &DeviceRegistry, cache: &StateCache) -> Value {
    let devices: serde_json::Map<String, Value> = ids
        .iter()
        .map(|id| {
            let state = match registry.get(id) {
                Ok(device) if device.is_enabled() => {
                    let mut states = crate::state::device_states(device, cache);
                    states.insert("online".to_string(), json!(true));
                    states.insert("status".to_string(), json!("SUCCESS"));
                    Value::Object(states)
                }
                _ => json!({ "online": false, "status": "ERROR", "errorCode": "deviceNotFound" }),
            };

            (id.to_string(), state)
        })
        .collect();

    json!({
        "requestId": request_id,
        "payload": { "devices": devices },
    })
}

/// Commands are carried out asynchronously, so known devices are answered with `PENDING`.
pub fn execute_response(request_id: &str, commands: &[ExecuteCommand], registry: &DeviceRegistry) -> Value {
    let mut pending: Vec<&str> = vec![];
    let mut not_found: Vec<&str> = vec![];

    for target in commands.iter().flat_map(|c| c.devices.iter()) {
        let id = target.id.as_str();
        if pending.contains(&id) || not_found.contains(&id) {
            continue;
        }

        match registry.get(id) {
            Ok(device) if device.is_enabled() => pending.push(id),
            _ => not_found.push(id),
        }
    }

    let mut results = vec![];
    if !pending.is_empty() {
        results.push(json!({ "ids": pending, "status": "PENDING" }));
    }
    if !not_found.is_empty() {
        results.push(json!({ "ids": not_found, "status": "ERROR", "errorCode": "deviceNotFound" }));
    }

    json!({
        "requestId": request_id,
        "payload": { "commands": results },
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_json_diff::assert_json_eq;

    use super::*;
    use crate::device::test;

    fn state() -> FulfillmentState {
        let registry = test::registry();
        let cache = StateCache::seeded(&registry, "google/REQUEST_SYNC");

        FulfillmentState {
            devices: Arc::new(DeviceStore::new(registry)),
            cache,
            router: EventRouter::new(),
            agent_user_id: "user-1".to_string(),
        }
    }

    fn request(body: Value) -> FulfillmentRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_sync_lists_enabled_devices() {
        let response = sync_response("req-1", "user-1", &test::registry());

        let devices = response["payload"]["devices"].as_array().unwrap();
        let ids: Vec<&str> = devices.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["fan", "light1", "washer"]);
        assert_eq!(response["payload"]["agentUserId"], json!("user-1"));

        assert_json_eq!(
            devices[1],
            json!({
                "id": "light1",
                "type": "action.devices.types.LIGHT",
                "traits": ["action.devices.traits.OnOff", "action.devices.traits.Brightness"],
                "name": { "name": "Kitchen light" },
                "willReportState": true,
                "roomHint": "Kitchen",
                "attributes": {}
            })
        );
        assert_json_eq!(devices[2]["attributes"], json!({ "availableModes": [] }));
    }

    #[test]
    fn test_query_reports_cached_state() {
        let state = state();
        state.cache.set("home/light1", "ON");
        state.cache.set("home/light1/brightness", "0");

        let response = query_response(
            "req-2",
            &["light1", "heater", "garage"],
            &state.devices.snapshot(),
            &state.cache,
        );

        assert_json_eq!(
            response,
            json!({
                "requestId": "req-2",
                "payload": {
                    "devices": {
                        "light1": { "on": true, "brightness": 0, "online": true, "status": "SUCCESS" },
                        "heater": { "online": false, "status": "ERROR", "errorCode": "deviceNotFound" },
                        "garage": { "online": false, "status": "ERROR", "errorCode": "deviceNotFound" }
                    }
                }
            })
        );
    }

    #[tokio::test]
    async fn test_execute_answers_pending_and_raises_command() {
        let state = state();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        state.router.subscribe(move |event: CommandReceived| {
            let tx = tx.clone();
            async move {
                tx.send(event.commands)?;
                Ok::<(), anyhow::Error>(())
            }
        });

        let response = handle(
            &state,
            request(json!({
                "requestId": "req-3",
                "inputs": [{
                    "intent": "action.devices.EXECUTE",
                    "payload": {
                        "commands": [{
                            "devices": [{ "id": "light1" }, { "id": "garage" }],
                            "execution": [{ "command": "action.devices.commands.OnOff", "params": { "on": true } }]
                        }]
                    }
                }]
            })),
        )
        .unwrap();

        assert_json_eq!(
            response,
            json!({
                "requestId": "req-3",
                "payload": {
                    "commands": [
                        { "ids": ["light1"], "status": "PENDING" },
                        { "ids": ["garage"], "status": "ERROR", "errorCode": "deviceNotFound" }
                    ]
                }
            })
        );

        let commands = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].execution[0].command, "action.devices.commands.OnOff");
    }

    #[test]
    fn test_disconnect_answers_empty_object() {
        let response = handle(
            &state(),
            request(json!({ "requestId": "req-4", "inputs": [{ "intent": "action.devices.DISCONNECT" }] })),
        )
        .unwrap();

        assert_json_eq!(response, json!({}));
    }

    #[test]
    fn test_request_without_intent_is_rejected() {
        let result = handle(&state(), request(json!({ "requestId": "req-5", "inputs": [] })));

        assert!(matches!(result, Err(FulfillmentError::NoIntent)));
    }

    #[test]
    fn test_malformed_query_payload_is_rejected() {
        let result = handle(
            &state(),
            request(json!({
                "requestId": "req-6",
                "inputs": [{ "intent": "action.devices.QUERY", "payload": { "devices": "light1" } }]
            })),
        );

        assert!(matches!(result, Err(FulfillmentError::MalformedPayload { .. })));
    }
}
