//! Bounded log of handler runs, newest last. Exposed over HTTP for inspection.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Outcome of running one handler for one event (after all attempts).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub event_id: String,
    pub event_name: String,
    pub function_id: String,
    pub status: RunStatus,
    pub attempts: u32,
    /// Handler result; null when the handler returned nothing or failed.
    pub output: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

pub struct RunLog {
    inner: RwLock<VecDeque<RunRecord>>,
    capacity: usize,
}

impl RunLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn push(&self, record: RunRecord) {
        let mut g = self.inner.write().await;
        if g.len() == self.capacity {
            g.pop_front();
        }
        g.push_back(record);
    }

    /// Up to `limit` records, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<RunRecord> {
        self.inner
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn for_event(&self, event_id: &str) -> Vec<RunRecord> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect()
    }
}
