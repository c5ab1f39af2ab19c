use std::sync::Arc;
use std::time::Duration;

use rumqttc::v5::{AsyncClient, mqttbytes::QoS};
use tokio::sync::Mutex;

use super::acks::{AckKind, PendingAcks};

/// Cloneable handle for everything that goes from us to the broker.
///
/// Subscribe and unsubscribe resolve only once the broker acknowledged them. They are sent one
/// at a time, shared by all clones.
#[derive(Clone)]
pub struct MqttSender {
    client: Arc<AsyncClient>,
    acks: PendingAcks,
    exclusive: Arc<Mutex<()>>,
    ack_timeout: Duration,
}

impl MqttSender {
    pub(super) fn new(client: Arc<AsyncClient>, acks: PendingAcks, ack_timeout: Duration) -> Self {
        Self {
            client,
            acks,
            exclusive: Arc::new(Mutex::new(())),
            ack_timeout,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn subscribe(&self, topic: &str) -> anyhow::Result<()> {
        tracing::info!("Subscribing to MQTT topic {}", topic);

        self.acknowledged(AckKind::Subscribe, topic)
            .await
            .map_err(|e| anyhow::anyhow!("Error subscribing to MQTT topic {}: {}", topic, e))
    }

    #[tracing::instrument(skip(self))]
    pub async fn unsubscribe(&self, topic: &str) -> anyhow::Result<()> {
        tracing::info!("Unsubscribing from MQTT topic {}", topic);

        self.acknowledged(AckKind::Unsubscribe, topic)
            .await
            .map_err(|e| anyhow::anyhow!("Error unsubscribing from MQTT topic {}: {}", topic, e))
    }

    async fn acknowledged(&self, kind: AckKind, topic: &str) -> anyhow::Result<()> {
        let _exclusive = self.exclusive.lock().await;

        let ack = self.acks.expect(kind);
        if !self.acks.is_connected() {
            self.acks.abandon();
            anyhow::bail!("not connected to broker");
        }

        let requested = match kind {
            AckKind::Subscribe => self.client.subscribe(topic, QoS::AtLeastOnce).await,
            AckKind::Unsubscribe => self.client.unsubscribe(topic).await,
        };

        if let Err(e) = requested {
            self.acks.abandon();
            return Err(e.into());
        }

        match tokio::time::timeout(self.ack_timeout, ack).await {
            Ok(Ok(result)) => result.map_err(anyhow::Error::msg),
            Ok(Err(_)) => anyhow::bail!("acknowledgment dropped"),
            Err(_) => {
                self.acks.abandon();
                anyhow::bail!("no acknowledgment within {:?}", self.ack_timeout)
            }
        }
    }

    #[tracing::instrument(skip_all, fields(topic = %topic, otel.name = format!("MQTT publish {}", topic)))]
    pub async fn publish(&self, topic: &str, payload: &str) -> anyhow::Result<()> {
        tracing::debug!("Publishing MQTT message to {topic}: {:?}", payload);

        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_owned())
            .await
            .map_err(|e| {
                tracing::error!("Error publishing MQTT message to {}: {}", topic, e);
                e.into()
            })
    }
}

#[cfg(test)]
mod tests {
    use rumqttc::v5::MqttOptions;

    use super::*;

    fn unpolled_sender(acks: PendingAcks) -> (MqttSender, rumqttc::v5::EventLoop) {
        let (client, event_loop) = AsyncClient::new(MqttOptions::new("test", "127.0.0.1", 1), 10);
        let sender = MqttSender::new(Arc::new(client), acks, Duration::from_millis(100));
        (sender, event_loop)
    }

    #[tokio::test]
    async fn subscribe_fails_without_connection() {
        let (sender, _event_loop) = unpolled_sender(PendingAcks::default());

        assert!(sender.subscribe("home/lamp/state").await.is_err());
        assert!(sender.unsubscribe("home/lamp/state").await.is_err());
    }

    #[tokio::test]
    async fn subscribe_fails_when_broker_never_acknowledges() {
        let acks = PendingAcks::default();
        acks.connected();
        let (sender, _event_loop) = unpolled_sender(acks.clone());

        assert!(sender.subscribe("home/lamp/state").await.is_err());
        assert!(!acks.is_waiting());
    }

    #[tokio::test]
    async fn subscribe_resolves_on_matching_ack() {
        let acks = PendingAcks::default();
        acks.connected();
        let (sender, _event_loop) = unpolled_sender(acks.clone());

        let broker = tokio::spawn({
            let acks = acks.clone();
            async move {
                while !acks.is_waiting() {
                    tokio::task::yield_now().await;
                }
                acks.sent(AckKind::Subscribe, 1);
                acks.acknowledged(AckKind::Subscribe, 1, Ok(()));
            }
        });

        assert!(sender.subscribe("home/lamp/state").await.is_ok());
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_fails_on_rejected_ack() {
        let acks = PendingAcks::default();
        acks.connected();
        let (sender, _event_loop) = unpolled_sender(acks.clone());

        let broker = tokio::spawn({
            let acks = acks.clone();
            async move {
                while !acks.is_waiting() {
                    tokio::task::yield_now().await;
                }
                acks.sent(AckKind::Unsubscribe, 5);
                acks.acknowledged(AckKind::Unsubscribe, 5, Err("not authorized".to_string()));
            }
        });

        assert!(sender.unsubscribe("home/lamp/state").await.is_err());
        broker.await.unwrap();
    }
}
