//! RPC-client seams the liquidation loop depends on (spec.md §4.4, §9
//! "Position aggregate referenced through an RPC client").

use async_trait::async_trait;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct MarginAccount {
    pub account_id: String,
    pub user_id: String,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub margin_requirement: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Paginated source of MARGIN accounts (spec.md §4.4 step 1, page size 100).
#[async_trait]
pub trait AccountClient: Send + Sync {
    async fn list_margin_accounts(&self, page: u32, page_size: u32) -> anyhow::Result<Vec<MarginAccount>>;
}

#[async_trait]
pub trait PositionClient: Send + Sync {
    async fn list_positions(&self, account_id: &str) -> anyhow::Result<Vec<Position>>;
}
