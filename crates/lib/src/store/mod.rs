//! Message persistence.
//!
//! The board only needs three queries: insert, find by id, and latest by creation time.
//! [`SqliteStore`] is the durable implementation; [`MemoryStore`] backs tests and
//! throwaway runs.

mod memory;
mod schema;
mod sqlite;

use crate::message::{Message, NewMessage};
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("message author must not be empty")]
    EmptyAuthor,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("creating database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid stored row: {0}")]
    Corrupt(String),
}

/// Insert-and-read access to messages. No update or delete: messages are immutable.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message; the store assigns id and creation time.
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Message>, StoreError>;

    /// Most recently created message, if any. Insertion order breaks timestamp ties.
    async fn find_latest(&self) -> Result<Option<Message>, StoreError>;

    /// Up to `limit` messages, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Message>, StoreError>;
}

fn check_author(message: &NewMessage) -> Result<(), StoreError> {
    if message.author.trim().is_empty() {
        return Err(StoreError::EmptyAuthor);
    }
    Ok(())
}

/// Creation time truncated to millisecond precision, matching what SQLite stores.
fn now_millis() -> chrono::DateTime<chrono::Utc> {
    let now = chrono::Utc::now();
    chrono::DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
