mod bus;
mod http;
mod monitoring;
mod mqtt;

pub use bus::{EventHub, SubscriptionToken};

pub use monitoring::MonitoringConfig;
pub use monitoring::TraceContext;

pub use http::client::HttpClientConfig;
pub use http::server::HttpServerConfig;
pub use mqtt::{Mqtt, MqttConfig, MqttInMessage, MqttSender, MqttSession, MqttSubscription};

pub mod meter {
    pub use super::monitoring::meter::increment;
}
