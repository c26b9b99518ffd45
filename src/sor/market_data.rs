//! Venue quote source seam (spec.md §4.5 step 1).

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueQuote {
    pub venue_id: String,
    pub is_dark_pool: bool,
    pub ask: Decimal,
    pub ask_size: Decimal,
    pub bid: Decimal,
    pub bid_size: Decimal,
    pub latency_ms: u64,
    pub fee_bps: Decimal,
}

#[async_trait]
pub trait MarketDataClient: Send + Sync {
    async fn get_quote(&self, venue_id: &str, symbol: &str) -> anyhow::Result<VenueQuote>;
    fn known_venues(&self) -> Vec<String>;
}
