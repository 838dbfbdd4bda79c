use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::events::{EventQueue, LearningEventKind};
use crate::scheduler::SchedulerService;
use crate::store::Store;

/// Handles shared by the daemon, the recompute worker and the cron jobs.
#[derive(Clone)]
pub struct AppState {
    store: Arc<Store>,
    service: Arc<SchedulerService>,
    events: EventQueue,
    config: Arc<Config>,
    shutdown_tx: broadcast::Sender<()>,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<Store>,
        service: Arc<SchedulerService>,
        events: EventQueue,
        config: &Config,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            store,
            service,
            events,
            config: Arc::new(config.clone()),
            shutdown_tx,
            started_at: Instant::now(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<SchedulerService> {
        &self.service
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fire-and-forget; see [`EventQueue::enqueue`].
    pub fn enqueue_learning_event(
        &self,
        user_id: &str,
        kind: LearningEventKind,
        payload: serde_json::Value,
    ) {
        self.events.enqueue(user_id, kind, payload);
    }

    pub fn shutdown_rx(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown_tx(&self) -> &broadcast::Sender<()> {
        &self.shutdown_tx
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
