//! Outbox message model (spec.md §3 "OutboxMessage", §4.7).

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Sent,
}

#[derive(Debug, Clone)]
pub struct OutboxMessage {
    pub id: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: String,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}
