//! Cross-venue arbitrage detection, auxiliary to the router (spec.md §4.5).

use crate::sor::market_data::{MarketDataClient, VenueQuote};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ArbitrageOpportunity {
    pub buy_venue: String,
    pub sell_venue: String,
    pub spread: Decimal,
    pub max_quantity: Decimal,
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CONCURRENT_PROBES: usize = 8;

pub struct ArbitrageDetector {
    market_data: Arc<dyn MarketDataClient>,
}

impl ArbitrageDetector {
    pub fn new(market_data: Arc<dyn MarketDataClient>) -> Self {
        Self { market_data }
    }

    /// For every ordered pair `(i, j)` with `bid_j > ask_i`, reports an
    /// opportunity (spec.md §4.5 "Arbitrage detection", "probes quotes
    /// across venues in parallel"). Mirrors `SorRouter::probe_venues`.
    pub async fn detect(&self, symbol: &str) -> Vec<ArbitrageOpportunity> {
        let venues = self.market_data.known_venues();
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_PROBES));
        let mut handles = Vec::with_capacity(venues.len());
        for venue_id in venues {
            let md = self.market_data.clone();
            let symbol = symbol.to_string();
            let sem = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok()?;
                match tokio::time::timeout(PROBE_TIMEOUT, md.get_quote(&venue_id, &symbol)).await {
                    Ok(Ok(q)) => Some(q),
                    Ok(Err(e)) => {
                        warn!(venue_id, error = %e, "arbitrage probe failed, dropping");
                        None
                    }
                    Err(_) => {
                        warn!(venue_id, "arbitrage probe timed out, dropping");
                        None
                    }
                }
            }));
        }
        let mut quotes: Vec<VenueQuote> = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(Some(quote)) = handle.await {
                quotes.push(quote);
            }
        }

        let mut opportunities = Vec::new();
        for i in &quotes {
            for j in &quotes {
                if i.venue_id == j.venue_id {
                    continue;
                }
                if j.bid > i.ask {
                    opportunities.push(ArbitrageOpportunity {
                        buy_venue: i.venue_id.clone(),
                        sell_venue: j.venue_id.clone(),
                        spread: j.bid - i.ask,
                        max_quantity: i.ask_size.min(j.bid_size),
                    });
                }
            }
        }
        opportunities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct Crossed;

    #[async_trait]
    impl MarketDataClient for Crossed {
        async fn get_quote(&self, venue_id: &str, _symbol: &str) -> anyhow::Result<VenueQuote> {
            match venue_id {
                "CHEAP" => Ok(VenueQuote {
                    venue_id: "CHEAP".into(),
                    is_dark_pool: false,
                    ask: dec!(99),
                    ask_size: dec!(10),
                    bid: dec!(98),
                    bid_size: dec!(10),
                    latency_ms: 10,
                    fee_bps: dec!(1),
                }),
                "RICH" => Ok(VenueQuote {
                    venue_id: "RICH".into(),
                    is_dark_pool: false,
                    ask: dec!(105),
                    ask_size: dec!(5),
                    bid: dec!(103),
                    bid_size: dec!(5),
                    latency_ms: 10,
                    fee_bps: dec!(1),
                }),
                other => anyhow::bail!("unknown venue {other}"),
            }
        }

        fn known_venues(&self) -> Vec<String> {
            vec!["CHEAP".into(), "RICH".into()]
        }
    }

    #[tokio::test]
    async fn detects_crossed_market() {
        let detector = ArbitrageDetector::new(Arc::new(Crossed));
        let opportunities = detector.detect("AAA").await;
        assert_eq!(opportunities.len(), 1);
        assert_eq!(opportunities[0].buy_venue, "CHEAP");
        assert_eq!(opportunities[0].sell_venue, "RICH");
        assert_eq!(opportunities[0].spread, dec!(4)); // 103 - 99
        assert_eq!(opportunities[0].max_quantity, dec!(5));
    }
}
