use std::sync::Arc;
use std::time::Duration;

use rumqttc::Outgoing;
use rumqttc::v5::{
    AsyncClient, Event, EventLoop, MqttOptions,
    mqttbytes::v5::{ConnectProperties, Packet, Publish},
};
use tokio::sync::{mpsc, watch};

use super::acks::{AckKind, PendingAcks, subscribe_result, unsubscribe_result};
use super::*;

/// Broker session as seen by the last successful connect. `generation` counts the connects,
/// zero means not connected yet. `resumed` tells whether the broker still knew our
/// subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MqttSession {
    pub generation: u64,
    pub resumed: bool,
}

/// Owns the broker connection. Incoming publishes of every subscribed topic are forwarded
/// to a single [`MqttSubscription`]; subscriptions themselves are managed through
/// [`MqttSender`] handles so they can change while the event loop is running.
pub struct Mqtt {
    client: Arc<AsyncClient>,
    event_loop: EventLoop,
    events: EventDispatch,
    rx: Option<mpsc::Receiver<MqttInMessage>>,
    ack_timeout: Duration,
}

impl Mqtt {
    pub fn connect(host: &str, port: u16, client_id: &str, keep_alive_secs: u64, ack_timeout: Duration) -> Self {
        let mut mqttoptions = MqttOptions::new(client_id, host, port);
        mqttoptions.set_keep_alive(Duration::from_secs(keep_alive_secs));
        mqttoptions.set_clean_start(false);

        let mut connect_props = ConnectProperties::new();
        connect_props.session_expiry_interval = 60.into();
        connect_props.max_packet_size = Some(1024 * 1024);
        mqttoptions.set_connect_properties(connect_props);

        let (client, event_loop) = AsyncClient::new(mqttoptions, 64);
        let (tx, rx) = mpsc::channel(256);

        Mqtt {
            client: Arc::new(client),
            event_loop,
            events: EventDispatch::new(tx),
            rx: Some(rx),
            ack_timeout,
        }
    }

    /// Stream of all incoming messages. Can be taken only once.
    pub fn subscription(&mut self) -> Option<MqttSubscription> {
        self.rx.take().map(MqttSubscription::new)
    }

    pub fn sender(&self) -> MqttSender {
        MqttSender::new(self.client.clone(), self.events.acks.clone(), self.ack_timeout)
    }

    /// Changes on every connect to the broker.
    pub fn sessions(&self) -> watch::Receiver<MqttSession> {
        self.events.sessions.subscribe()
    }

    pub async fn run(mut self) {
        loop {
            match self.event_loop.poll().await {
                Ok(event) => self.events.handle(event).await,
                Err(e) => {
                    tracing::error!("MQTT error: {}", e);
                    self.events.connection_lost(&e.to_string());
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

struct EventDispatch {
    tx: mpsc::Sender<MqttInMessage>,
    acks: PendingAcks,
    sessions: watch::Sender<MqttSession>,
}

impl EventDispatch {
    fn new(tx: mpsc::Sender<MqttInMessage>) -> Self {
        Self {
            tx,
            acks: PendingAcks::default(),
            sessions: watch::Sender::new(MqttSession::default()),
        }
    }

    async fn handle(&self, event: Event) {
        match event {
            Event::Incoming(Packet::Publish(publish)) => self.forward(publish).await,
            Event::Incoming(Packet::ConnAck(connack)) => {
                tracing::info!("Connected to MQTT broker (session present: {})", connack.session_present);
                self.acks.connected();
                self.sessions.send_modify(|session| {
                    session.generation += 1;
                    session.resumed = connack.session_present;
                });
            }
            Event::Incoming(Packet::SubAck(suback)) => {
                self.acks
                    .acknowledged(AckKind::Subscribe, suback.pkid, subscribe_result(&suback.return_codes));
            }
            Event::Incoming(Packet::UnsubAck(unsuback)) => {
                self.acks
                    .acknowledged(AckKind::Unsubscribe, unsuback.pkid, unsubscribe_result(&unsuback.reasons));
            }
            Event::Outgoing(Outgoing::Subscribe(pkid)) => self.acks.sent(AckKind::Subscribe, pkid),
            Event::Outgoing(Outgoing::Unsubscribe(pkid)) => self.acks.sent(AckKind::Unsubscribe, pkid),
            _ => {}
        }
    }

    fn connection_lost(&self, reason: &str) {
        self.acks.disconnected(reason);
    }

    async fn forward(&self, msg: Publish) {
        let mqtt_in_message: MqttInMessage = match (&msg).try_into() {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("Error parsing MQTT message: {}", e);
                return;
            }
        };

        tracing::trace!("Received MQTT message on topic {}", mqtt_in_message.topic);

        if let Err(e) = self
            .tx
            .send_timeout(mqtt_in_message, tokio::time::Duration::from_secs(5))
            .await
        {
            tracing::error!("Failed to forward MQTT message to subscriber: {}", e);
        }
    }
}
