//! Wiring: store, reply backend, event bus and dispatcher.

use crate::config::{self, Config};
use crate::events::{Dispatcher, EventPublisher, LocalEventBus, RetryPolicy, RunLog};
use crate::llm::{self, ChatBackend};
use crate::steps::StepMemo;
use crate::store::{MessageStore, SqliteStore};
use crate::workflow::ReplyWorkflow;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const RUN_LOG_CAPACITY: usize = 100;

/// Running application: what the HTTP layer and CLI need to submit and read messages.
pub struct App {
    pub config: Arc<Config>,
    pub store: Arc<dyn MessageStore>,
    pub events: Arc<dyn EventPublisher>,
    pub runs: Arc<RunLog>,
    /// Dispatcher loop; ends once every bus sender (including `events`) is dropped.
    pub dispatcher: JoinHandle<()>,
}

impl App {
    /// Open the SQLite store from config and start the reply workflow.
    pub async fn open(config: Config, config_path: &Path) -> Result<Self> {
        let url = config::resolve_database_url(&config, config_path);
        let store = Arc::new(
            SqliteStore::open(&url)
                .await
                .with_context(|| format!("opening message store at {}", url))?,
        );
        log::info!("message store: {}", url);
        let retention = Duration::from_secs(config.events.step_retention_hours.saturating_mul(3600));
        store
            .prune_step_results(retention)
            .await
            .context("pruning expired step results")?;
        let backend = llm::build_backend(&config);
        Ok(Self::assemble(config, store.clone(), store, backend))
    }

    /// Start the bus and dispatcher over the given parts. Must be called inside a tokio runtime.
    pub fn assemble(
        config: Config,
        store: Arc<dyn MessageStore>,
        memo: Arc<dyn StepMemo>,
        backend: Arc<dyn ChatBackend>,
    ) -> Self {
        let (bus, rx) = LocalEventBus::channel(config.events.queue_capacity);
        let runs = Arc::new(RunLog::new(RUN_LOG_CAPACITY));
        let workflow = Arc::new(ReplyWorkflow::new(store.clone(), backend));
        let dispatcher = Dispatcher::new(memo, runs.clone(), RetryPolicy::from(&config.events))
            .subscribe(workflow)
            .spawn(rx);
        Self {
            config: Arc::new(config),
            store,
            events: Arc::new(bus),
            runs,
            dispatcher,
        }
    }
}
