use std::future::Future;

use infrastructure::MqttSender;

/// The parts of the MQTT connection the bridge core talks to.
pub trait MqttBus: Clone + Send + Sync + 'static {
    fn subscribe(&self, topic: &str) -> impl Future<Output = anyhow::Result<()>> + Send;
    fn unsubscribe(&self, topic: &str) -> impl Future<Output = anyhow::Result<()>> + Send;
    fn publish(&self, topic: &str, payload: &str) -> impl Future<Output = anyhow::Result<()>> + Send;
}

impl MqttBus for MqttSender {
    async fn subscribe(&self, topic: &str) -> anyhow::Result<()> {
        MqttSender::subscribe(self, topic).await
    }

    async fn unsubscribe(&self, topic: &str) -> anyhow::Result<()> {
        MqttSender::unsubscribe(self, topic).await
    }

    async fn publish(&self, topic: &str, payload: &str) -> anyhow::Result<()> {
        MqttSender::publish(self, topic, payload).await
    }
}
