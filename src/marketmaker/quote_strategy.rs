//! Per-symbol quote strategy model and tick logic (spec.md §3, §4.6).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StrategyStatus {
    Active,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteStrategy {
    pub id: String,
    pub symbol: String,
    pub spread: Decimal,
    pub min_order_size: Decimal,
    pub max_order_size: Decimal,
    pub max_position: Decimal,
    pub status: StrategyStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceCounters {
    pub ticks: u64,
    pub quotes_placed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MakerSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone)]
pub struct MakerQuote {
    pub side: MakerSide,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// One tick of the market-making strategy (spec.md §4.6 "Tick logic").
/// Returns `None` if the strategy should not quote this tick.
pub fn tick(strategy: &QuoteStrategy, mid: Decimal) -> Option<[MakerQuote; 2]> {
    if strategy.status != StrategyStatus::Active {
        return None;
    }
    let half_spread = strategy.spread / Decimal::from(2);
    let bid = mid * (Decimal::ONE - half_spread);
    let ask = mid * (Decimal::ONE + half_spread);
    Some([
        MakerQuote { side: MakerSide::Buy, price: bid, quantity: strategy.min_order_size },
        MakerQuote { side: MakerSide::Sell, price: ask, quantity: strategy.min_order_size },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tick_computes_symmetric_quotes_around_mid() {
        let strategy = QuoteStrategy {
            id: "s1".into(),
            symbol: "BTC".into(),
            spread: dec!(0.002),
            min_order_size: dec!(0.01),
            max_order_size: dec!(1),
            max_position: dec!(5),
            status: StrategyStatus::Active,
        };
        let quotes = tick(&strategy, dec!(100)).unwrap();
        assert_eq!(quotes[0].price, dec!(99.9));
        assert_eq!(quotes[1].price, dec!(100.1));
    }

    #[test]
    fn tick_returns_none_when_not_active() {
        let strategy = QuoteStrategy {
            id: "s2".into(),
            symbol: "BTC".into(),
            spread: dec!(0.002),
            min_order_size: dec!(0.01),
            max_order_size: dec!(1),
            max_position: dec!(5),
            status: StrategyStatus::Paused,
        };
        assert!(tick(&strategy, dec!(100)).is_none());
    }
}
