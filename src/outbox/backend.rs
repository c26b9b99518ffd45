//! The per-aggregate seam the dispatcher and janitor operate against. Each
//! aggregate store (`LedgerStore`, `VaultStore`, ...) owns its own
//! `*_outbox_messages` table and implements this trait over it.

use crate::errors::CoreResult;
use crate::outbox::model::OutboxMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait OutboxBackend: Send + Sync {
    /// A label used only for logging (e.g. "ledger", "vault").
    fn name(&self) -> &'static str;

    /// Claims up to `batch_size` pending rows (spec.md §5 "claimed by the
    /// dispatcher with LIMIT + update-in-place").
    async fn claim_pending(&self, batch_size: u32) -> CoreResult<Vec<OutboxMessage>>;

    async fn mark_sent(&self, ids: &[String]) -> CoreResult<()>;

    /// Deletes sent rows older than `cutoff`; returns the count removed.
    async fn delete_sent_older_than(&self, cutoff: DateTime<Utc>) -> CoreResult<u64>;
}
