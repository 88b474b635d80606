//! Durable steps: units of work whose output is recorded by (event id, step name).
//!
//! A handler wraps each side-effecting call in [`StepContext::run`]. When the same
//! event is retried or redelivered, completed steps return their recorded output
//! instead of running again.

mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

pub use memory::MemoryStepMemo;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct StepKey {
    pub event_id: String,
    pub step: String,
}

impl StepKey {
    pub fn new(event_id: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            step: step.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("step memo backend failed: {0}")]
    Memo(String),
    #[error("step output encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Records completed step outputs. Saving an already-recorded key keeps the first value.
#[async_trait]
pub trait StepMemo: Send + Sync {
    async fn load(&self, key: &StepKey) -> Result<Option<serde_json::Value>, StepError>;
    async fn save(&self, key: &StepKey, output: &serde_json::Value) -> Result<(), StepError>;
}

/// Step runner bound to one event delivery.
#[derive(Clone)]
pub struct StepContext {
    event_id: String,
    memo: Arc<dyn StepMemo>,
}

impl StepContext {
    pub fn new(event_id: impl Into<String>, memo: Arc<dyn StepMemo>) -> Self {
        Self {
            event_id: event_id.into(),
            memo,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Run `f` once per (event, step). A recorded output is decoded and returned without calling `f`.
    /// A failing `f` records nothing, so the next attempt runs it again.
    pub async fn run<T, E, F, Fut>(&self, name: &str, f: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StepError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = StepKey::new(self.event_id.as_str(), name);
        if let Some(recorded) = self.memo.load(&key).await? {
            log::debug!(
                "step {} for event {} already completed, reusing output",
                name,
                self.event_id
            );
            return serde_json::from_value(recorded).map_err(|e| E::from(StepError::Codec(e)));
        }
        let output = f().await?;
        let value = serde_json::to_value(&output).map_err(StepError::Codec)?;
        self.memo.save(&key, &value).await?;
        log::debug!("step {} for event {} completed", name, self.event_id);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error(transparent)]
        Step(#[from] StepError),
        #[error("boom")]
        Boom,
    }

    #[tokio::test]
    async fn completed_step_is_not_rerun() {
        let memo: Arc<dyn StepMemo> = Arc::new(MemoryStepMemo::new());
        let ctx = StepContext::new("evt-1", memo);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let out: String = ctx
                .run("greet", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>("hi".to_string())
                })
                .await
                .expect("run");
            assert_eq!(out, "hi");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_step_runs_again() {
        let memo: Arc<dyn StepMemo> = Arc::new(MemoryStepMemo::new());
        let ctx = StepContext::new("evt-1", memo);
        let first: Result<u32, TestError> = ctx.run("count", || async { Err(TestError::Boom) }).await;
        assert!(matches!(first, Err(TestError::Boom)));
        let second: u32 = ctx
            .run("count", || async { Ok::<_, TestError>(7) })
            .await
            .expect("second attempt");
        assert_eq!(second, 7);
    }

    #[tokio::test]
    async fn steps_are_scoped_by_event() {
        let memo: Arc<dyn StepMemo> = Arc::new(MemoryStepMemo::new());
        let a = StepContext::new("evt-a", memo.clone());
        let b = StepContext::new("evt-b", memo);
        let out_a: u32 = a.run("n", || async { Ok::<_, TestError>(1) }).await.expect("a");
        let out_b: u32 = b.run("n", || async { Ok::<_, TestError>(2) }).await.expect("b");
        assert_eq!((out_a, out_b), (1, 2));
    }
}
