//! Events: typed payloads, publish seam, in-process bus, and the dispatcher that
//! runs subscribed handlers with retries.
//!
//! Flow: a publisher wraps an [`Event`] in an [`EventEnvelope`] (fresh id, name,
//! JSON data) and sends it over the bus; the [`Dispatcher`] receives it, runs
//! every handler subscribed to that name, and records the outcome in the [`RunLog`].

mod bus;
mod dispatcher;
mod runs;

use crate::message::MessageId;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use bus::LocalEventBus;
pub use dispatcher::{Dispatcher, EventHandler, RetryPolicy};
pub use runs::{RunLog, RunRecord, RunStatus};

/// A typed event with a fixed wire name.
pub trait Event: Serialize + DeserializeOwned {
    const NAME: &'static str;
}

/// Published after a user message is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSent {
    pub message_id: MessageId,
}

impl Event for MessageSent {
    const NAME: &'static str = "app/message.sent";
}

/// Wire form of an event: `{ "id", "name", "data", "ts" }`.
/// Redelivery reuses the same `id`, which is what step memoization keys on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Unix ms at publish time.
    pub ts: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("event payload encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("expected event {expected}, got {actual}")]
    NameMismatch { expected: String, actual: String },
    #[error("event bus is closed")]
    Closed,
}

impl EventEnvelope {
    pub fn new<E: Event>(event: &E) -> Result<Self, BusError> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: E::NAME.to_string(),
            data: serde_json::to_value(event)?,
            ts: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Decode `data` as `E`, checking the name first.
    pub fn decode<E: Event>(&self) -> Result<E, BusError> {
        if self.name != E::NAME {
            return Err(BusError::NameMismatch {
                expected: E::NAME.to_string(),
                actual: self.name.clone(),
            });
        }
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Sends envelopes to the event substrate.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), BusError>;
}

/// Wrap `event` in a new envelope and publish it. Returns the envelope that was sent.
pub async fn send<E: Event + Sync>(
    publisher: &dyn EventPublisher,
    event: &E,
) -> Result<EventEnvelope, BusError> {
    let envelope = EventEnvelope::new(event)?;
    publisher.publish(envelope.clone()).await?;
    Ok(envelope)
}
