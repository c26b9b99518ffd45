//! Deletes sent outbox rows older than the retention window (spec.md §4.7).

use crate::concurrency::ShutdownSignal;
use crate::outbox::backend::OutboxBackend;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct OutboxJanitor {
    backends: Vec<Arc<dyn OutboxBackend>>,
    retention: chrono::Duration,
    tick_interval: Duration,
}

impl OutboxJanitor {
    pub fn new(backends: Vec<Arc<dyn OutboxBackend>>, retention: chrono::Duration, tick_interval: Duration) -> Self {
        Self { backends, retention, tick_interval }
    }

    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if shutdown.is_triggered() {
                        return;
                    }
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => {
                    if shutdown.is_triggered() {
                        return;
                    }
                }
            }
        }
    }

    pub async fn sweep_once(&self) {
        let cutoff = Utc::now() - self.retention;
        for backend in &self.backends {
            match backend.delete_sent_older_than(cutoff).await {
                Ok(count) if count > 0 => debug!(backend = backend.name(), count, "outbox janitor: pruned sent rows"),
                Ok(_) => {}
                Err(e) => warn!(backend = backend.name(), error = %e, "outbox janitor: prune failed"),
            }
        }
    }
}
