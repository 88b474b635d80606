//! In-memory step memo.

use super::{StepError, StepKey, StepMemo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct MemoryStepMemo {
    inner: Arc<RwLock<HashMap<StepKey, serde_json::Value>>>,
}

impl MemoryStepMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded step outputs.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl StepMemo for MemoryStepMemo {
    async fn load(&self, key: &StepKey) -> Result<Option<serde_json::Value>, StepError> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn save(&self, key: &StepKey, output: &serde_json::Value) -> Result<(), StepError> {
        self.inner
            .write()
            .await
            .entry(key.clone())
            .or_insert_with(|| output.clone());
        Ok(())
    }
}
