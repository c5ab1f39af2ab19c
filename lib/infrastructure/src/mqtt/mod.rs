mod acks;
mod client;
mod receiver;
mod sender;

use std::time::Duration;

pub use client::{Mqtt, MqttSession};
pub use receiver::{MqttInMessage, MqttSubscription};
pub use sender::MqttSender;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    host: String,
    port: u16,
    client_id: String,
    #[serde(default = "default_keep_alive_secs")]
    keep_alive_secs: u64,
    #[serde(default = "default_ack_timeout_secs")]
    ack_timeout_secs: u64,
}

fn default_keep_alive_secs() -> u64 {
    5
}

fn default_ack_timeout_secs() -> u64 {
    10
}

impl MqttConfig {
    pub fn new_client(&self) -> Mqtt {
        Mqtt::connect(
            &self.host,
            self.port,
            &self.client_id,
            self.keep_alive_secs,
            Duration::from_secs(self.ack_timeout_secs),
        )
    }
}
