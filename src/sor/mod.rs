//! Smart Order Router: venue aggregation and route planning (spec.md §4.5).

pub mod arbitrage;
pub mod market_data;
pub mod plan;
pub mod router;
pub mod store;

pub use arbitrage::{ArbitrageDetector, ArbitrageOpportunity};
pub use market_data::{MarketDataClient, VenueQuote};
pub use plan::{ExecutionReport, OrderRoute, PlanStatus, SORPlan, Strategy};
pub use router::{RouteConstraints, SorRouter};
pub use store::SorStore;
