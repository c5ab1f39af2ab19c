use std::sync::{Arc, Mutex, MutexGuard};

use rumqttc::v5::mqttbytes::v5::{SubscribeReasonCode, UnsubAckReason};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AckKind {
    Subscribe,
    Unsubscribe,
}

pub(super) type AckResult = Result<(), String>;

struct Waiter {
    kind: AckKind,
    pkid: Option<u16>,
    tx: oneshot::Sender<AckResult>,
}

#[derive(Default)]
struct AckState {
    connected: bool,
    waiter: Option<Waiter>,
}

/// Pairs the subscribe or unsubscribe request in flight with the broker's acknowledgment.
///
/// Only one such request is outstanding at a time. The packet id is learned from the
/// outgoing event of the event loop and must match the id of the incoming ack.
#[derive(Clone, Default)]
pub(super) struct PendingAcks {
    state: Arc<Mutex<AckState>>,
}

impl PendingAcks {
    fn state(&self) -> MutexGuard<'_, AckState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn connected(&self) {
        self.state().connected = true;
    }

    /// Fails the request in flight. Its ack will never arrive on the new connection.
    pub fn disconnected(&self, reason: &str) {
        let mut state = self.state();
        state.connected = false;

        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.tx.send(Err(format!("connection lost: {}", reason)));
        }
    }

    pub fn expect(&self, kind: AckKind) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter { kind, pkid: None, tx };

        if let Some(previous) = self.state().waiter.replace(waiter) {
            let _ = previous.tx.send(Err("superseded by a newer request".to_string()));
        }

        rx
    }

    pub fn abandon(&self) {
        self.state().waiter = None;
    }

    pub fn sent(&self, kind: AckKind, pkid: u16) {
        let mut state = self.state();

        if let Some(waiter) = state.waiter.as_mut() {
            if waiter.kind == kind && waiter.pkid.is_none() {
                waiter.pkid = Some(pkid);
            }
        }
    }

    pub fn acknowledged(&self, kind: AckKind, pkid: u16, result: AckResult) {
        let mut state = self.state();

        let matches = state
            .waiter
            .as_ref()
            .is_some_and(|waiter| waiter.kind == kind && waiter.pkid == Some(pkid));

        match state.waiter.take_if(|_| matches) {
            Some(waiter) => {
                let _ = waiter.tx.send(result);
            }
            None => tracing::debug!("Ignoring {:?} ack {} without a waiting request", kind, pkid),
        }
    }

    #[cfg(test)]
    pub fn is_waiting(&self) -> bool {
        self.state().waiter.is_some()
    }
}

pub(super) fn subscribe_result(codes: &[SubscribeReasonCode]) -> AckResult {
    match codes.iter().find(|code| !matches!(code, SubscribeReasonCode::Success(_))) {
        Some(code) => Err(format!("broker rejected subscription: {:?}", code)),
        None => Ok(()),
    }
}

pub(super) fn unsubscribe_result(reasons: &[UnsubAckReason]) -> AckResult {
    let rejected = reasons
        .iter()
        .find(|reason| !matches!(reason, UnsubAckReason::Success | UnsubAckReason::NoSubscriptionExisted));

    match rejected {
        Some(reason) => Err(format!("broker rejected unsubscribe: {:?}", reason)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use rumqttc::v5::mqttbytes::QoS;

    use super::*;

    #[tokio::test]
    async fn ack_completes_request_with_matching_packet_id() {
        let acks = PendingAcks::default();
        acks.connected();

        let rx = acks.expect(AckKind::Subscribe);
        acks.sent(AckKind::Subscribe, 7);
        acks.acknowledged(AckKind::Subscribe, 7, Ok(()));

        assert_eq!(rx.await.unwrap(), Ok(()));
        assert!(!acks.is_waiting());
    }

    #[tokio::test]
    async fn ack_with_other_packet_id_is_ignored() {
        let acks = PendingAcks::default();
        acks.connected();

        let mut rx = acks.expect(AckKind::Subscribe);
        acks.sent(AckKind::Subscribe, 7);
        acks.acknowledged(AckKind::Subscribe, 3, Ok(()));
        acks.acknowledged(AckKind::Unsubscribe, 7, Ok(()));

        assert!(rx.try_recv().is_err());
        assert!(acks.is_waiting());
    }

    #[tokio::test]
    async fn ack_before_request_was_sent_is_ignored() {
        let acks = PendingAcks::default();
        acks.connected();

        let mut rx = acks.expect(AckKind::Unsubscribe);
        acks.acknowledged(AckKind::Unsubscribe, 1, Ok(()));

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejection_reaches_waiting_request() {
        let acks = PendingAcks::default();
        acks.connected();

        let rx = acks.expect(AckKind::Subscribe);
        acks.sent(AckKind::Subscribe, 2);
        acks.acknowledged(
            AckKind::Subscribe,
            2,
            subscribe_result(&[SubscribeReasonCode::NotAuthorized]),
        );

        assert!(rx.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn lost_connection_fails_request_in_flight() {
        let acks = PendingAcks::default();
        acks.connected();

        let rx = acks.expect(AckKind::Subscribe);
        acks.sent(AckKind::Subscribe, 4);
        acks.disconnected("reset by peer");

        assert!(rx.await.unwrap().is_err());
        assert!(!acks.is_connected());
    }

    #[test]
    fn subscribe_reason_codes() {
        assert_eq!(subscribe_result(&[SubscribeReasonCode::Success(QoS::AtLeastOnce)]), Ok(()));
        assert!(subscribe_result(&[SubscribeReasonCode::TopicFilterInvalid]).is_err());
        assert!(subscribe_result(&[SubscribeReasonCode::QuotaExceeded]).is_err());
    }

    #[test]
    fn unsubscribe_reason_codes() {
        assert_eq!(unsubscribe_result(&[UnsubAckReason::Success]), Ok(()));
        assert_eq!(unsubscribe_result(&[UnsubAckReason::NoSubscriptionExisted]), Ok(()));
        assert!(unsubscribe_result(&[UnsubAckReason::NotAuthorized]).is_err());
    }
}
