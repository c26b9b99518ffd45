//! Smart order routing plan model (spec.md §3, §4.5).

use crate::risk::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    BestPrice,
    LowestFee,
    Fastest,
    SmartSplit,
    DarkPoolFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanStatus {
    Planned,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRoute {
    pub route_id: String,
    pub venue_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub expected_fill: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SORPlan {
    pub plan_id: String,
    pub parent_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub total_quantity: Decimal,
    pub strategy: Strategy,
    pub routes: Vec<OrderRoute>,
    pub average_price: Decimal,
    pub expected_cost: Decimal,
    pub total_fee: Decimal,
    pub market_impact: Decimal,
    pub confidence_score: Decimal,
    pub status: PlanStatus,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub report_id: String,
    pub plan_id: String,
    pub route_id: String,
    pub venue_id: String,
    pub filled_qty: Decimal,
    pub filled_price: Decimal,
    pub fee: Decimal,
    pub slippage: Decimal,
    pub latency_ms: u64,
    pub executed_at: DateTime<Utc>,
}

impl SORPlan {
    /// spec.md §8 invariant 3: routes sum exactly to total_quantity.
    pub fn invariant_holds(&self) -> bool {
        let summed: Decimal = self.routes.iter().map(|r| r.quantity).sum();
        summed == self.total_quantity
    }
}
