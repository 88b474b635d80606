//! Message entity: the only record the board persists.
//!
//! Messages are created either by a signed-in user (author = user id) or by the
//! reply workflow (author = [`AI_AUTHOR`]). They are never updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author marker for messages written by the reply workflow.
pub const AI_AUTHOR: &str = "AI";

/// Store-assigned message identifier (opaque string).
pub type MessageId = String;

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// Insert request: the fields a caller supplies. Id and timestamp come from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub text: String,
    pub author: String,
}

impl NewMessage {
    pub fn from_user(text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            author: user_id.into(),
        }
    }

    /// A reply authored by the workflow.
    pub fn ai_reply(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            author: AI_AUTHOR.to_string(),
        }
    }
}

impl Message {
    pub fn is_ai(&self) -> bool {
        self.author == AI_AUTHOR
    }
}
