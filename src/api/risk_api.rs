//! Risk HTTP surface (spec.md §6 "Risk service").

use crate::errors::{CoreError, CoreResult};
use crate::risk::{LimitType, RiskAlert, RiskAssessment, RiskAssessor, RiskLimit, Side};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;

pub fn router(assessor: Arc<RiskAssessor>) -> Router {
    Router::new()
        .route("/assess", post(assess_risk))
        .route("/users/:user_id/metrics", get(get_risk_metrics))
        .route("/users/:user_id/limits/:limit_type", get(check_risk_limit))
        .route("/users/:user_id/alerts", get(get_risk_alerts))
        .with_state(assessor)
}

#[derive(Deserialize)]
struct AssessRiskRequest {
    user_id: String,
    symbol: String,
    side: Side,
    quantity: Decimal,
    price: Decimal,
}

async fn assess_risk(State(assessor): State<Arc<RiskAssessor>>, Json(req): Json<AssessRiskRequest>) -> CoreResult<Json<RiskAssessment>> {
    Ok(Json(assessor.assess_risk(&req.user_id, &req.symbol, req.side, req.quantity, req.price).await?))
}

async fn get_risk_metrics(State(assessor): State<Arc<RiskAssessor>>, Path(user_id): Path<String>) -> CoreResult<Json<Vec<RiskAssessment>>> {
    Ok(Json(assessor.store().list_assessments(&user_id).await?))
}

async fn check_risk_limit(
    State(assessor): State<Arc<RiskAssessor>>,
    Path((user_id, limit_type)): Path<(String, String)>,
) -> CoreResult<Json<RiskLimit>> {
    let limit_type = parse_limit_type(&limit_type)?;
    assessor
        .store()
        .get_limit(&user_id, limit_type)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("no {limit_type:?} limit set for {user_id}")))
        .map(Json)
}

fn parse_limit_type(s: &str) -> CoreResult<LimitType> {
    match s {
        "MAX_SINGLE_ORDER_VALUE" => Ok(LimitType::MaxSingleOrderValue),
        "MAX_DAILY_LOSS" => Ok(LimitType::MaxDailyLoss),
        "POSITION_SIZE" => Ok(LimitType::PositionSize),
        "LEVERAGE" => Ok(LimitType::Leverage),
        other => Err(CoreError::InvalidArgument(format!("unknown limit type {other}"))),
    }
}

#[derive(Deserialize)]
struct AlertsQuery {
    #[serde(default = "default_limit")]
    limit: u32,
}
fn default_limit() -> u32 {
    20
}

async fn get_risk_alerts(
    State(assessor): State<Arc<RiskAssessor>>,
    Path(user_id): Path<String>,
    Query(q): Query<AlertsQuery>,
) -> CoreResult<Json<Vec<RiskAlert>>> {
    Ok(Json(assessor.store().list_alerts(&user_id, q.limit).await?))
}
