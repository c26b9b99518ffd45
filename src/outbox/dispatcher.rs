//! Outbox dispatcher: claims pending rows in batches, forwards them to the
//! message bus, marks them sent. At-least-once delivery (spec.md §4.7).

use crate::concurrency::ShutdownSignal;
use crate::outbox::backend::OutboxBackend;
use crate::outbox::publisher::MessageBus;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct OutboxDispatcher {
    backends: Vec<Arc<dyn OutboxBackend>>,
    bus: Arc<dyn MessageBus>,
    batch_size: u32,
    tick_interval: Duration,
}

impl OutboxDispatcher {
    pub fn new(backends: Vec<Arc<dyn OutboxBackend>>, bus: Arc<dyn MessageBus>, batch_size: u32, tick_interval: Duration) -> Self {
        Self { backends, bus, batch_size, tick_interval }
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
                    self.dispatch_once().await;
                }
                _ = shutdown.changed() => {
                    if shutdown.is_triggered() {
                        return;
                    }
                }
            }
        }
    }

    pub async fn dispatch_once(&self) {
        for backend in &self.backends {
            if let Err(e) = self.dispatch_backend(backend.as_ref()).await {
                warn!(backend = backend.name(), error = %e, "outbox dispatch failed");
            }
        }
    }

    async fn dispatch_backend(&self, backend: &dyn OutboxBackend) -> crate::errors::CoreResult<()> {
        let messages = backend.claim_pending(self.batch_size).await?;
        if messages.is_empty() {
            return Ok(());
        }
        let mut sent_ids = Vec::with_capacity(messages.len());
        for message in &messages {
            match self.bus.publish(&message.event_type, &message.payload).await {
                Ok(()) => sent_ids.push(message.id.clone()),
                Err(e) => warn!(backend = backend.name(), event_id = %message.event_id, error = %e, "outbox publish failed, will retry"),
            }
        }
        if !sent_ids.is_empty() {
            debug!(backend = backend.name(), count = sent_ids.len(), "outbox: marking dispatched rows sent");
            backend.mark_sent(&sent_ids).await?;
        }
        Ok(())
    }
}
