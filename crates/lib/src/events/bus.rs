//! In-process event bus over a bounded tokio mpsc channel.

use super::{BusError, EventEnvelope, EventPublisher};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Publishing half of the local bus. Cheap to clone; the receiver goes to the dispatcher.
#[derive(Clone)]
pub struct LocalEventBus {
    tx: mpsc::Sender<EventEnvelope>,
}

impl LocalEventBus {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EventEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventPublisher for LocalEventBus {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), BusError> {
        log::debug!("publishing event {} ({})", envelope.name, envelope.id);
        self.tx.send(envelope).await.map_err(|_| BusError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{send, MessageSent};

    #[tokio::test]
    async fn published_envelope_reaches_receiver() {
        let (bus, mut rx) = LocalEventBus::channel(4);
        let sent = send(
            &bus,
            &MessageSent {
                message_id: "m1".to_string(),
            },
        )
        .await
        .expect("send");
        let got = rx.recv().await.expect("receive");
        assert_eq!(got, sent);
        assert_eq!(
            got.decode::<MessageSent>().expect("decode").message_id,
            "m1"
        );
    }

    #[tokio::test]
    async fn publish_after_receiver_dropped_fails() {
        let (bus, rx) = LocalEventBus::channel(4);
        drop(rx);
        let err = send(
            &bus,
            &MessageSent {
                message_id: "m1".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BusError::Closed));
    }
}
