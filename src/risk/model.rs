//! Risk domain model (spec.md §3, §4.3).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warn,
    High,
    Critical,
}

impl From<RiskLevel> for Severity {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low => Severity::Info,
            RiskLevel::Medium => Severity::Warn,
            RiskLevel::High => Severity::High,
            RiskLevel::Critical => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub risk_level: RiskLevel,
    pub risk_score: Decimal,
    pub margin_requirement: Decimal,
    pub is_allowed: bool,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitType {
    MaxSingleOrderValue,
    MaxDailyLoss,
    PositionSize,
    Leverage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimit {
    pub id: String,
    pub user_id: String,
    pub limit_type: LimitType,
    pub limit_value: Decimal,
    pub current_value: Decimal,
    pub is_exceeded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreaker {
    pub user_id: String,
    pub is_fired: bool,
    pub trigger_reason: String,
    pub fired_at: Option<DateTime<Utc>>,
    pub auto_reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlert {
    pub id: String,
    pub user_id: String,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Symbols in this set carry the 1.5x high-volatility multiplier
/// (spec.md §4.3 step 2 "symbol-class factor").
pub fn is_high_volatility_symbol(symbol: &str) -> bool {
    matches!(symbol, "DOGE" | "SHIB" | "PEPE") || symbol.ends_with("PERP")
}
