//! In-memory message store (process lifetime only).

use super::{check_author, new_message_id, now_millis, MessageStore, StoreError};
use crate::message::{Message, NewMessage};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Messages kept in insertion order.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Vec<Message>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Snapshot of every message, oldest first.
    pub async fn all(&self) -> Vec<Message> {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
        check_author(&message)?;
        let stored = Message {
            id: new_message_id(),
            text: message.text,
            author: message.author,
            created_at: now_millis(),
        };
        self.inner.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Message>, StoreError> {
        Ok(self.inner.read().await.iter().find(|m| m.id == id).cloned())
    }

    async fn find_latest(&self) -> Result<Option<Message>, StoreError> {
        // max_by_key returns the last maximum, so later pushes win ties.
        let g = self.inner.read().await;
        Ok(g.iter().max_by_key(|m| m.created_at).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let g = self.inner.read().await;
        let mut out: Vec<Message> = g.iter().rev().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_assigns_id_and_keeps_fields() {
        let store = MemoryStore::new();
        let m = store
            .insert(NewMessage::from_user("hello", "u1"))
            .await
            .expect("insert");
        assert!(!m.id.is_empty());
        assert_eq!(m.text, "hello");
        assert_eq!(m.author, "u1");
        let found = store.find_by_id(&m.id).await.expect("find");
        assert_eq!(found, Some(m));
    }

    #[tokio::test]
    async fn insert_rejects_empty_author() {
        let store = MemoryStore::new();
        let err = store
            .insert(NewMessage::from_user("hello", "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EmptyAuthor));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn latest_prefers_last_inserted() {
        let store = MemoryStore::new();
        assert!(store.find_latest().await.expect("latest").is_none());
        store.insert(NewMessage::from_user("first", "u1")).await.expect("insert");
        let second = store
            .insert(NewMessage::ai_reply("second"))
            .await
            .expect("insert");
        let latest = store.find_latest().await.expect("latest");
        assert_eq!(latest.map(|m| m.id), Some(second.id));
    }

    #[tokio::test]
    async fn list_recent_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store
                .insert(NewMessage::from_user(format!("m{}", i), "u1"))
                .await
                .expect("insert");
        }
        let recent = store.list_recent(2).await.expect("list");
        let texts: Vec<&str> = recent.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m1"]);
    }
}
