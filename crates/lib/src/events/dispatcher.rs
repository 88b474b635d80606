//! Event dispatcher: delivers envelopes to subscribed handlers.
//!
//! Each received event is handled on its own task; there is no ordering between
//! events. A failing handler is retried per [`RetryPolicy`] with the same
//! [`StepContext`], so steps that already completed are not repeated.

use super::runs::{RunLog, RunRecord, RunStatus};
use super::EventEnvelope;
use crate::config::EventsConfig;
use crate::steps::{StepContext, StepMemo};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};

fn log_join(done: Result<(), JoinError>) {
    if let Err(e) = done {
        log::warn!("event delivery task ended abnormally: {}", e);
    }
}

/// A function subscribed to one event name.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable function id (used in run records).
    fn id(&self) -> &str;
    /// Event name this handler subscribes to.
    fn event_name(&self) -> &str;
    async fn handle(
        &self,
        event: &EventEnvelope,
        step: &StepContext,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Substrate retry policy: total attempts per handler run and a fixed delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&EventsConfig::default())
    }
}

impl From<&EventsConfig> for RetryPolicy {
    fn from(config: &EventsConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
    memo: Arc<dyn StepMemo>,
    runs: Arc<RunLog>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(memo: Arc<dyn StepMemo>, runs: Arc<RunLog>, retry: RetryPolicy) -> Self {
        Self {
            handlers: Vec::new(),
            memo,
            runs,
            retry,
        }
    }

    pub fn subscribe(mut self, handler: Arc<dyn EventHandler>) -> Self {
        log::debug!(
            "function {} subscribed to {}",
            handler.id(),
            handler.event_name()
        );
        self.handlers.push(handler);
        self
    }

    /// Run every handler subscribed to `event.name`, one after another, and record each run.
    /// Events with no subscriber are dropped.
    pub async fn deliver(&self, event: EventEnvelope) -> Vec<RunRecord> {
        let mut records = Vec::new();
        for handler in self.handlers.iter().filter(|h| h.event_name() == event.name) {
            let record = self.run_handler(handler.as_ref(), &event).await;
            self.runs.push(record.clone()).await;
            records.push(record);
        }
        if records.is_empty() {
            log::debug!("no function subscribed to {}, dropping {}", event.name, event.id);
        }
        records
    }

    /// Receive events until every sender is dropped, handling each on its own task.
    /// The returned handle resolves only after every in-flight delivery has finished.
    pub fn spawn(self, mut rx: mpsc::Receiver<EventEnvelope>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut in_flight = JoinSet::new();
            loop {
                tokio::select! {
                    received = rx.recv() => {
                        let Some(event) = received else { break };
                        let dispatcher = self.clone();
                        in_flight.spawn(async move {
                            dispatcher.deliver(event).await;
                        });
                    }
                    Some(done) = in_flight.join_next() => log_join(done),
                }
            }
            if !in_flight.is_empty() {
                log::info!("event bus closed, waiting for {} delivery(ies)", in_flight.len());
            }
            while let Some(done) = in_flight.join_next().await {
                log_join(done);
            }
            log::info!("event dispatcher stopped");
        })
    }

    async fn run_handler(&self, handler: &dyn EventHandler, event: &EventEnvelope) -> RunRecord {
        let step = StepContext::new(event.id.as_str(), self.memo.clone());
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match handler.handle(event, &step).await {
                Ok(output) => {
                    log::info!(
                        "function {} completed for event {} (attempt {})",
                        handler.id(),
                        event.id,
                        attempt
                    );
                    return self.record(handler, event, RunStatus::Completed, attempt, output, None);
                }
                Err(e) if attempt < max_attempts => {
                    log::warn!(
                        "function {} failed for event {} (attempt {}/{}): {:#}",
                        handler.id(),
                        event.id,
                        attempt,
                        max_attempts,
                        e
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(e) => {
                    log::warn!(
                        "function {} gave up on event {} after {} attempt(s): {:#}",
                        handler.id(),
                        event.id,
                        attempt,
                        e
                    );
                    return self.record(
                        handler,
                        event,
                        RunStatus::Failed,
                        attempt,
                        serde_json::Value::Null,
                        Some(format!("{:#}", e)),
                    );
                }
            }
        }
    }

    fn record(
        &self,
        handler: &dyn EventHandler,
        event: &EventEnvelope,
        status: RunStatus,
        attempts: u32,
        output: serde_json::Value,
        error: Option<String>,
    ) -> RunRecord {
        RunRecord {
            event_id: event.id.clone(),
            event_name: event.name.clone(),
            function_id: handler.id().to_string(),
            status,
            attempts,
            output,
            error,
            finished_at: chrono::Utc::now(),
        }
    }
}
