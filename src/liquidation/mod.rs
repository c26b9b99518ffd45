//! Margin liquidation scanning (spec.md §4.4).

pub mod clients;
pub mod loop_;

pub use clients::{AccountClient, MarginAccount, Position, PositionClient, PositionSide};
pub use loop_::{LiquidationLoop, PositionLiquidationTriggered};
