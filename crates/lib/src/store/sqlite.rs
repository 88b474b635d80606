//! SQLite-backed store for messages and durable step results.

use super::{check_author, new_message_id, now_millis, schema, MessageStore, StoreError};
use crate::message::{Message, NewMessage};
use crate::steps::{StepError, StepKey, StepMemo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    text: String,
    author: String,
    created_at: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let created_at = DateTime::<Utc>::from_timestamp_millis(row.created_at).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "message {} has out-of-range created_at {}",
                row.id, row.created_at
            ))
        })?;
        Ok(Message {
            id: row.id,
            text: row.text,
            author: row.author,
            created_at,
        })
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Create the parent directory of a file-backed database URL (`sqlite://path/to/db`).
fn ensure_database_directory(url: &str) -> Result<(), StoreError> {
    if is_memory_url(url) {
        return Ok(());
    }
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and ensure the schema exists.
    /// `sqlite::memory:` keeps a single pooled connection alive so the data survives.
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        ensure_database_directory(url)?;
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool_options = if is_memory_url(url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)
        };
        let pool = pool_options.connect_with(options).await?;
        schema::initialize(&pool).await?;
        log::debug!("sqlite store opened at {}", url);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Delete recorded step outputs completed more than `retention` ago. Returns the number removed.
    pub async fn prune_step_results(&self, retention: Duration) -> Result<u64, StoreError> {
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp_millis().saturating_sub(retention_ms);
        let removed = sqlx::query("DELETE FROM step_results WHERE completed_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if removed > 0 {
            log::info!("pruned {} step result(s) older than {:?}", removed, retention);
        }
        Ok(removed)
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
        check_author(&message)?;
        let stored = Message {
            id: new_message_id(),
            text: message.text,
            author: message.author,
            created_at: now_millis(),
        };
        sqlx::query("INSERT INTO messages (id, text, author, created_at) VALUES (?, ?, ?, ?)")
            .bind(&stored.id)
            .bind(&stored.text)
            .bind(&stored.author)
            .bind(stored.created_at.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(stored)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT id, text, author, created_at FROM messages WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Message::try_from).transpose()
    }

    async fn find_latest(&self) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT id, text, author, created_at FROM messages ORDER BY created_at DESC, seq DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(Message::try_from).transpose()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, text, author, created_at FROM messages ORDER BY created_at DESC, seq DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Message::try_from).collect()
    }
}

#[async_trait]
impl StepMemo for SqliteStore {
    async fn load(&self, key: &StepKey) -> Result<Option<serde_json::Value>, StepError> {
        let output: Option<String> = sqlx::query_scalar(
            "SELECT output FROM step_results WHERE event_id = ? AND step = ?",
        )
        .bind(&key.event_id)
        .bind(&key.step)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StepError::Memo(e.to_string()))?;
        output
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(StepError::Codec)
    }

    async fn save(&self, key: &StepKey, output: &serde_json::Value) -> Result<(), StepError> {
        let encoded = serde_json::to_string(output)?;
        sqlx::query(
            "INSERT INTO step_results (event_id, step, output, completed_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(event_id, step) DO NOTHING",
        )
        .bind(&key.event_id)
        .bind(&key.step)
        .bind(encoded)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| StepError::Memo(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        SqliteStore::open("sqlite::memory:").await.expect("open sqlite")
    }

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let store = memory_store().await;
        let m = store
            .insert(NewMessage::from_user("hello", "u1"))
            .await
            .expect("insert");
        let found = store.find_by_id(&m.id).await.expect("find");
        assert_eq!(found, Some(m));
        assert!(store.find_by_id("missing").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn latest_breaks_ties_by_insertion_order() {
        let store = memory_store().await;
        let first = store
            .insert(NewMessage::from_user("first", "u1"))
            .await
            .expect("insert");
        // Same timestamp as `first`, inserted later.
        sqlx::query("INSERT INTO messages (id, text, author, created_at) VALUES (?, ?, ?, ?)")
            .bind("tie")
            .bind("second")
            .bind("AI")
            .bind(first.created_at.timestamp_millis())
            .execute(store.pool())
            .await
            .expect("raw insert");
        let latest = store.find_latest().await.expect("latest").expect("some");
        assert_eq!(latest.id, "tie");
        let recent = store.list_recent(10).await.expect("list");
        let ids: Vec<&str> = recent.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["tie", first.id.as_str()]);
    }

    #[tokio::test]
    async fn empty_author_is_not_written() {
        let store = memory_store().await;
        let err = store
            .insert(NewMessage::from_user("hello", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EmptyAuthor));
        assert!(store.find_latest().await.expect("latest").is_none());
    }

    #[tokio::test]
    async fn step_memo_keeps_first_output() {
        let store = memory_store().await;
        let key = StepKey::new("evt-1", "create-reply");
        assert!(store.load(&key).await.expect("load").is_none());
        store
            .save(&key, &serde_json::json!("first"))
            .await
            .expect("save");
        store
            .save(&key, &serde_json::json!("second"))
            .await
            .expect("save again");
        assert_eq!(
            store.load(&key).await.expect("load"),
            Some(serde_json::json!("first"))
        );
    }

    #[tokio::test]
    async fn prune_removes_only_expired_step_results() {
        let store = memory_store().await;
        let fresh = StepKey::new("evt-new", "create-reply");
        store
            .save(&fresh, &serde_json::json!("kept"))
            .await
            .expect("save");
        let two_days_ago = Utc::now().timestamp_millis() - 2 * 24 * 60 * 60 * 1000;
        sqlx::query(
            "INSERT INTO step_results (event_id, step, output, completed_at) VALUES (?, ?, ?, ?)",
        )
        .bind("evt-old")
        .bind("create-reply")
        .bind("\"stale\"")
        .bind(two_days_ago)
        .execute(store.pool())
        .await
        .expect("raw insert");

        let removed = store
            .prune_step_results(Duration::from_secs(24 * 60 * 60))
            .await
            .expect("prune");
        assert_eq!(removed, 1);
        let old = StepKey::new("evt-old", "create-reply");
        assert!(store.load(&old).await.expect("load").is_none());
        assert_eq!(
            store.load(&fresh).await.expect("load"),
            Some(serde_json::json!("kept"))
        );
    }

    #[tokio::test]
    async fn file_database_is_created_with_parent_dir() {
        let dir = std::env::temp_dir().join(format!("postbox-store-test-{}", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}", dir.join("nested").join("postbox.db").display());
        let store = SqliteStore::open(&url).await.expect("open file db");
        store
            .insert(NewMessage::from_user("persisted", "u1"))
            .await
            .expect("insert");
        drop(store);
        let reopened = SqliteStore::open(&url).await.expect("reopen");
        let latest = reopened.find_latest().await.expect("latest").expect("some");
        assert_eq!(latest.text, "persisted");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
