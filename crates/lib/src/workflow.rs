//! Reply workflow: reacts to `app/message.sent` by asking the reply backend for an answer
//! and storing it as a message from `AI`.
//!
//! Lookup → `create-reply` step → `add-reply-to-message` step → summary. Both steps are
//! memoized per event, so a retry after a failed insert does not call the model again and
//! a redelivered event does not store a second reply.

use crate::events::{BusError, Event, EventEnvelope, EventHandler, MessageSent};
use crate::llm::{ChatBackend, LlmError};
use crate::message::{Message, NewMessage};
use crate::steps::{StepContext, StepError};
use crate::store::{MessageStore, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const FUNCTION_ID: &str = "message-sent";
pub const STEP_CREATE_REPLY: &str = "create-reply";
pub const STEP_ADD_REPLY: &str = "add-reply-to-message";

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("bad event: {0}")]
    Event(#[from] BusError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Model(#[from] LlmError),
    #[error(transparent)]
    Step(#[from] StepError),
}

/// Returned to the substrate for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyOutcome {
    pub event: EventEnvelope,
    pub body: String,
}

pub struct ReplyWorkflow {
    store: Arc<dyn MessageStore>,
    backend: Arc<dyn ChatBackend>,
}

impl ReplyWorkflow {
    pub fn new(store: Arc<dyn MessageStore>, backend: Arc<dyn ChatBackend>) -> Self {
        Self { store, backend }
    }

    /// `Ok(None)` when the referenced message does not exist; nothing is written then.
    pub async fn run(
        &self,
        event: &EventEnvelope,
        step: &StepContext,
    ) -> Result<Option<ReplyOutcome>, WorkflowError> {
        let sent: MessageSent = event.decode()?;
        let Some(message) = self.store.find_by_id(&sent.message_id).await? else {
            log::debug!(
                "message {} from event {} not found, skipping reply",
                sent.message_id,
                step.event_id()
            );
            return Ok(None);
        };

        let backend = self.backend.clone();
        let reply: String = step
            .run(STEP_CREATE_REPLY, || async move {
                backend
                    .reply(&message.text)
                    .await
                    .map_err(WorkflowError::from)
            })
            .await?;

        let store = self.store.clone();
        let stored: Message = step
            .run(STEP_ADD_REPLY, || async move {
                store
                    .insert(NewMessage::ai_reply(reply))
                    .await
                    .map_err(WorkflowError::from)
            })
            .await?;

        log::info!(
            "reply {} stored for event {}",
            stored.id,
            step.event_id()
        );
        Ok(Some(ReplyOutcome {
            event: event.clone(),
            body: format!("Here's your last message: {}!", stored.text),
        }))
    }
}

#[async_trait]
impl EventHandler for ReplyWorkflow {
    fn id(&self) -> &str {
        FUNCTION_ID
    }

    fn event_name(&self) -> &str {
        MessageSent::NAME
    }

    async fn handle(
        &self,
        event: &EventEnvelope,
        step: &StepContext,
    ) -> anyhow::Result<serde_json::Value> {
        let outcome = self.run(event, step).await?;
        Ok(serde_json::to_value(outcome)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Dispatcher, RetryPolicy, RunLog, RunStatus};
    use crate::llm::{PlaceholderBackend, PLACEHOLDER_REPLY};
    use crate::steps::{MemoryStepMemo, StepMemo};
    use crate::store::{MemoryStore, SqliteStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        async fn reply(&self, text: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("echo: {}", text))
        }
    }

    /// Fails the first AI insert, then delegates.
    struct FlakyStore {
        inner: MemoryStore,
        failed: AtomicUsize,
    }

    #[async_trait]
    impl MessageStore for FlakyStore {
        async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
            if message.author == "AI" && self.failed.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StoreError::Corrupt("connection reset".to_string()));
            }
            self.inner.insert(message).await
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Message>, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn find_latest(&self) -> Result<Option<Message>, StoreError> {
            self.inner.find_latest().await
        }

        async fn list_recent(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
            self.inner.list_recent(limit).await
        }
    }

    fn sent_event(message_id: &str) -> EventEnvelope {
        EventEnvelope::new(&MessageSent {
            message_id: message_id.to_string(),
        })
        .expect("envelope")
    }

    fn step_for(event: &EventEnvelope, memo: &MemoryStepMemo) -> StepContext {
        StepContext::new(event.id.as_str(), Arc::new(memo.clone()) as Arc<dyn StepMemo>)
    }

    #[tokio::test]
    async fn placeholder_reply_is_stored_as_ai() {
        let store = MemoryStore::new();
        let user = store
            .insert(NewMessage::from_user("hello", "u1"))
            .await
            .expect("insert");
        let workflow = ReplyWorkflow::new(Arc::new(store.clone()), Arc::new(PlaceholderBackend));
        let memo = MemoryStepMemo::new();
        let event = sent_event(&user.id);

        let outcome = workflow
            .run(&event, &step_for(&event, &memo))
            .await
            .expect("run")
            .expect("outcome");

        let latest = store.find_latest().await.expect("latest").expect("reply");
        assert_eq!(latest.author, "AI");
        assert_eq!(latest.text, PLACEHOLDER_REPLY);
        assert_eq!(store.len().await, 2);
        assert_eq!(
            outcome.body,
            format!("Here's your last message: {}!", PLACEHOLDER_REPLY)
        );
        assert_eq!(outcome.event, event);
    }

    #[tokio::test]
    async fn missing_message_is_skipped_silently() {
        let store = MemoryStore::new();
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let workflow = ReplyWorkflow::new(Arc::new(store.clone()), backend.clone());
        let memo = MemoryStepMemo::new();
        let event = sent_event("does-not-exist");

        let outcome = workflow
            .run(&event, &step_for(&event, &memo))
            .await
            .expect("no error");
        assert!(outcome.is_none());
        assert!(store.is_empty().await);
        assert!(memo.is_empty().await);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn redelivered_event_does_not_duplicate_reply() {
        let store = MemoryStore::new();
        let user = store
            .insert(NewMessage::from_user("hello", "u1"))
            .await
            .expect("insert");
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let workflow = ReplyWorkflow::new(Arc::new(store.clone()), backend.clone());
        let memo = MemoryStepMemo::new();
        let event = sent_event(&user.id);

        let first = workflow.run(&event, &step_for(&event, &memo)).await.expect("first");
        let second = workflow.run(&event, &step_for(&event, &memo)).await.expect("second");

        assert_eq!(first, second);
        assert_eq!(store.len().await, 2);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_after_failed_insert_reuses_generated_reply() {
        let inner = MemoryStore::new();
        let user = inner
            .insert(NewMessage::from_user("hello", "u1"))
            .await
            .expect("insert");
        let store = Arc::new(FlakyStore {
            inner: inner.clone(),
            failed: AtomicUsize::new(0),
        });
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let workflow = Arc::new(ReplyWorkflow::new(store, backend.clone()));
        let runs = Arc::new(RunLog::new(8));
        let dispatcher = Dispatcher::new(
            Arc::new(MemoryStepMemo::new()),
            runs.clone(),
            RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(1),
            },
        )
        .subscribe(workflow);

        let records = dispatcher.deliver(sent_event(&user.id)).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RunStatus::Completed);
        assert_eq!(records[0].attempts, 2);
        assert_eq!(records[0].function_id, FUNCTION_ID);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        let all = inner.all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].text, "echo: hello");
        assert_eq!(
            records[0].output["body"],
            serde_json::json!("Here's your last message: echo: hello!")
        );
    }

    #[tokio::test]
    async fn not_found_run_completes_with_null_output() {
        let store = Arc::new(MemoryStore::new());
        let workflow = Arc::new(ReplyWorkflow::new(store, Arc::new(PlaceholderBackend)));
        let dispatcher = Dispatcher::new(
            Arc::new(MemoryStepMemo::new()),
            Arc::new(RunLog::new(8)),
            RetryPolicy::default(),
        )
        .subscribe(workflow);
        let records = dispatcher.deliver(sent_event("missing")).await;
        assert_eq!(records[0].status, RunStatus::Completed);
        assert_eq!(records[0].attempts, 1);
        assert!(records[0].output.is_null());
    }

    #[tokio::test]
    async fn redelivery_after_reopen_uses_recorded_steps() {
        let dir = std::env::temp_dir().join(format!("postbox-workflow-test-{}", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}", dir.join("postbox.db").display());
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });

        let store = Arc::new(SqliteStore::open(&url).await.expect("open"));
        let user = store
            .insert(NewMessage::from_user("hello", "u1"))
            .await
            .expect("insert");
        let event = sent_event(&user.id);
        let workflow = ReplyWorkflow::new(store.clone(), backend.clone());
        let step = StepContext::new(event.id.as_str(), store.clone() as Arc<dyn StepMemo>);
        let first = workflow.run(&event, &step).await.expect("first run");
        store.pool().close().await;
        drop(workflow);
        drop(store);

        let reopened = Arc::new(SqliteStore::open(&url).await.expect("reopen"));
        let workflow = ReplyWorkflow::new(reopened.clone(), backend.clone());
        let step = StepContext::new(event.id.as_str(), reopened.clone() as Arc<dyn StepMemo>);
        let second = workflow.run(&event, &step).await.expect("redelivery");

        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        let all = reopened.list_recent(10).await.expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|m| m.is_ai()).count(), 1);

        reopened.pool().close().await;
        let _ = std::fs::remove_dir_all(&dir);
    }
}
