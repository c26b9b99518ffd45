//! Downstream message bus seam the dispatcher forwards to.

use async_trait::async_trait;

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, event_type: &str, payload: &str) -> anyhow::Result<()>;
}

/// Forwards every published message to an in-process log; useful for
/// local runs and as a fallback before a real bus is wired in.
pub struct LoggingBus;

#[async_trait]
impl MessageBus for LoggingBus {
    async fn publish(&self, event_type: &str, payload: &str) -> anyhow::Result<()> {
        tracing::info!(event_type, payload, "outbox: published");
        Ok(())
    }
}
