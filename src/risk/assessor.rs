//! Risk assessment pipeline (spec.md §4.3, scenario S3).

use crate::errors::{CoreError, CoreResult};
use crate::risk::model::{
    is_high_volatility_symbol, LimitType, RiskAlert, RiskAssessment, RiskLevel, Severity, Side,
};
use crate::risk::store::RiskStore;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub struct RiskAssessor {
    store: RiskStore,
}

fn margin_rate(level: RiskLevel) -> Decimal {
    match level {
        RiskLevel::Low => dec!(0.05),
        RiskLevel::Medium => dec!(0.10),
        RiskLevel::High => dec!(0.20),
        RiskLevel::Critical => dec!(0.50),
    }
}

fn risk_level(score: Decimal) -> RiskLevel {
    if score < dec!(5) {
        RiskLevel::Low
    } else if score < dec!(15) {
        RiskLevel::Medium
    } else if score < dec!(30) {
        RiskLevel::High
    } else {
        RiskLevel::Critical
    }
}

impl RiskAssessor {
    pub fn new(store: RiskStore) -> Self {
        Self { store }
    }

    pub async fn assess_risk(
        &self,
        user_id: &str,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> CoreResult<RiskAssessment> {
        if quantity <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(CoreError::InvalidArgument("quantity and price must be positive".into()));
        }

        let now = Utc::now();
        let order_value = quantity * price;
        let symbol_factor = if is_high_volatility_symbol(symbol) { dec!(1.5) } else { dec!(1.0) };

        if let Some(breaker) = self.store.get_circuit_breaker(user_id).await? {
            if breaker.is_fired {
                let expired = breaker.auto_reset_at.map(|t| now >= t).unwrap_or(false);
                if !expired {
                    let reason = format!("Trading suspended: {}", breaker.trigger_reason);
                    return self
                        .finalize(user_id, symbol, side, quantity, price, RiskLevel::Critical, Decimal::ZERO, Decimal::ZERO, false, reason)
                        .await;
                }
            }
        }

        let side_factor = if side == Side::Sell { dec!(1.2) } else { dec!(1.0) };
        let risk_score = (order_value / dec!(10000)) * side_factor * symbol_factor;
        let level = risk_level(risk_score);
        let margin_requirement = order_value * margin_rate(level) * symbol_factor;

        if let Some(limit) = self.store.get_limit(user_id, LimitType::MaxSingleOrderValue).await? {
            if order_value > limit.limit_value {
                let reason = format!(
                    "order value {order_value} exceeds MAX_SINGLE_ORDER_VALUE limit of {}",
                    limit.limit_value
                );
                return self
                    .finalize(user_id, symbol, side, quantity, price, level, risk_score, margin_requirement, false, reason)
                    .await;
            }
        }

        if let Some(limit) = self.store.get_limit(user_id, LimitType::Leverage).await? {
            if margin_requirement > limit.limit_value {
                let reason = format!(
                    "margin requirement {margin_requirement} exceeds LEVERAGE limit of {}",
                    limit.limit_value
                );
                return self
                    .finalize(user_id, symbol, side, quantity, price, level, risk_score, margin_requirement, false, reason)
                    .await;
            }
        }

        let is_allowed = level != RiskLevel::Critical;
        let reason = if is_allowed { String::new() } else { format!("risk level {level:?} denies trade") };

        self.finalize(user_id, symbol, side, quantity, price, level, risk_score, margin_requirement, is_allowed, reason)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        user_id: &str,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        level: RiskLevel,
        risk_score: Decimal,
        margin_requirement: Decimal,
        is_allowed: bool,
        reason: String,
    ) -> CoreResult<RiskAssessment> {
        let assessment = RiskAssessment {
            id: crate::idgen::new_id("risk"),
            user_id: user_id.to_string(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            risk_level: level,
            risk_score,
            margin_requirement,
            is_allowed,
            reason,
            created_at: Utc::now(),
        };
        self.store.insert_assessment(&assessment).await?;

        if matches!(level, RiskLevel::High | RiskLevel::Critical) {
            let alert = RiskAlert {
                id: crate::idgen::new_id("alert"),
                user_id: user_id.to_string(),
                alert_type: "RISK_ASSESSMENT".to_string(),
                severity: Severity::from(level),
                message: format!("{symbol} {:?} qty={} price={} scored {level:?}", assessment.side, quantity, price),
                created_at: Utc::now(),
            };
            self.store.insert_alert(&alert).await?;
        }

        Ok(assessment)
    }

    pub fn store(&self) -> &RiskStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::model::RiskLimit;

    async fn setup() -> RiskAssessor {
        RiskAssessor::new(RiskStore::open_in_memory().unwrap())
    }

    /// S3 — risk denial by per-user MAX_SINGLE_ORDER_VALUE limit.
    #[tokio::test]
    async fn s3_risk_denial_by_limit() {
        let assessor = setup().await;
        assessor
            .store
            .upsert_limit(&RiskLimit {
                id: crate::idgen::new_id("lim"),
                user_id: "U".into(),
                limit_type: LimitType::MaxSingleOrderValue,
                limit_value: dec!(10000),
                current_value: Decimal::ZERO,
                is_exceeded: false,
            })
            .await
            .unwrap();

        let result = assessor.assess_risk("U", "AAA", Side::Buy, dec!(200), dec!(60)).await.unwrap();
        assert!(!result.is_allowed);
        assert!(result.reason.contains("12000"));
        assert!(result.reason.contains("10000"));

        let assessments = assessor.store().list_assessments("U").await.unwrap();
        assert_eq!(assessments.len(), 1);
        let alerts = assessor.store().list_alerts("U", 10).await.unwrap();
        assert!(alerts.is_empty(), "LOW/MEDIUM score should not raise an alert");
    }

    /// spec.md §4.3 step 5's second conjunct: even a LOW/MEDIUM-scored order
    /// is denied if its margin requirement exceeds the user's LEVERAGE cap.
    #[tokio::test]
    async fn margin_requirement_over_leverage_cap_denies_despite_low_score() {
        let assessor = setup().await;
        assessor
            .store
            .upsert_limit(&RiskLimit {
                id: crate::idgen::new_id("lim"),
                user_id: "U6".into(),
                limit_type: LimitType::Leverage,
                limit_value: dec!(10),
                current_value: Decimal::ZERO,
                is_exceeded: false,
            })
            .await
            .unwrap();

        let result = assessor.assess_risk("U6", "AAA", Side::Buy, dec!(100), dec!(10)).await.unwrap();
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert!(!result.is_allowed);
        assert!(result.reason.contains("LEVERAGE"));
    }

    #[tokio::test]
    async fn high_volatility_symbol_gets_multiplier() {
        let assessor = setup().await;
        let result = assessor.assess_risk("U2", "DOGE", Side::Buy, dec!(1000), dec!(10)).await.unwrap();
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn critical_level_is_denied_and_alerted() {
        let assessor = setup().await;
        let result = assessor.assess_risk("U3", "XYZ", Side::Sell, dec!(10000), dec!(100)).await.unwrap();
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert!(!result.is_allowed);
        let alerts = assessor.store().list_alerts("U3", 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn fired_circuit_breaker_denies_trade() {
        use crate::risk::model::CircuitBreaker;
        use chrono::Duration;

        let store = RiskStore::open_in_memory().unwrap();
        store
            .set_circuit_breaker(&CircuitBreaker {
                user_id: "U4".into(),
                is_fired: true,
                trigger_reason: "manual halt".into(),
                fired_at: Some(Utc::now()),
                auto_reset_at: Some(Utc::now() + Duration::hours(1)),
            })
            .await
            .unwrap();

        let assessor = RiskAssessor::new(store);
        let result = assessor.assess_risk("U4", "AAA", Side::Buy, dec!(1), dec!(1)).await.unwrap();
        assert!(!result.is_allowed);
        assert!(result.reason.contains("manual halt"));
    }

    #[tokio::test]
    async fn expired_circuit_breaker_allows_trade() {
        use crate::risk::model::CircuitBreaker;
        use chrono::Duration;

        let store = RiskStore::open_in_memory().unwrap();
        store
            .set_circuit_breaker(&CircuitBreaker {
                user_id: "U5".into(),
                is_fired: true,
                trigger_reason: "manual halt".into(),
                fired_at: Some(Utc::now() - Duration::hours(2)),
                auto_reset_at: Some(Utc::now() - Duration::hours(1)),
            })
            .await
            .unwrap();

        let assessor = RiskAssessor::new(store);
        let result = assessor.assess_risk("U5", "AAA", Side::Buy, dec!(1), dec!(1)).await.unwrap();
        assert!(result.is_allowed);
    }
}
