//! Market-making runtime: per-symbol quote and grid strategies (spec.md §4.6).

pub mod grid;
pub mod quote_strategy;
pub mod runtime;

pub use grid::{Grid, GridOrderAction, GridSide, GridStatus, GridStrategy};
pub use quote_strategy::{MakerQuote, MakerSide, PerformanceCounters, QuoteStrategy, StrategyStatus};
pub use runtime::{MarketMakerRuntime, MidPriceClient, OrderClient};
