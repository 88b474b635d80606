//! Message submission: the only write path for users.

use crate::events::{self, BusError, EventPublisher, MessageSent};
use crate::message::{Message, NewMessage};
use crate::store::{MessageStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("You must be signed in to create messages!")]
    Unauthorized,
    #[error("storing message failed: {0}")]
    Store(#[from] StoreError),
    #[error("publishing message event failed: {0}")]
    Publish(#[from] BusError),
}

/// Store `text` as a message by `user_id`, then publish `app/message.sent` with its id.
///
/// An empty (or whitespace-only) `user_id` is rejected before anything is written.
/// The body is accepted as-is. The event goes out only after the insert succeeded.
pub async fn create_message(
    store: &dyn MessageStore,
    publisher: &dyn EventPublisher,
    text: &str,
    user_id: &str,
) -> Result<Message, SubmitError> {
    if user_id.trim().is_empty() {
        return Err(SubmitError::Unauthorized);
    }
    let message = store.insert(NewMessage::from_user(text, user_id)).await?;
    let envelope = events::send(
        publisher,
        &MessageSent {
            message_id: message.id.clone(),
        },
    )
    .await?;
    log::info!(
        "message {} stored for {}; event {} published",
        message.id,
        message.author,
        envelope.id
    );
    Ok(message)
}
