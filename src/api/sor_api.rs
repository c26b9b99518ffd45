//! Smart order router HTTP surface (spec.md §6 "SOR service").

use crate::errors::CoreResult;
use crate::risk::Side;
use crate::sor::{ExecutionReport, RouteConstraints, SORPlan, SorRouter, Strategy, VenueQuote};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;

pub fn router(sor: Arc<SorRouter>) -> Router {
    Router::new()
        .route("/plans", post(create_plan))
        .route("/depths/:symbol", get(aggregate_depths))
        .route("/executions", post(record_execution))
        .with_state(sor)
}

#[derive(Deserialize)]
struct CreatePlanRequest {
    parent_order_id: String,
    symbol: String,
    side: Side,
    total_quantity: Decimal,
    strategy: Strategy,
    #[serde(default)]
    venue_filter: Option<Vec<String>>,
    #[serde(default)]
    allow_dark_pool: bool,
    #[serde(default)]
    min_fill_rate: Option<Decimal>,
}

async fn create_plan(State(sor): State<Arc<SorRouter>>, Json(req): Json<CreatePlanRequest>) -> CoreResult<Json<SORPlan>> {
    let constraints = RouteConstraints {
        venue_filter: req.venue_filter,
        allow_dark_pool: req.allow_dark_pool,
        min_fill_rate: req.min_fill_rate,
    };
    let plan = sor
        .create_plan(&req.parent_order_id, &req.symbol, req.side, req.total_quantity, req.strategy, constraints)
        .await?;
    Ok(Json(plan))
}

async fn aggregate_depths(State(sor): State<Arc<SorRouter>>, Path(symbol): Path<String>) -> Json<Vec<VenueQuote>> {
    let venues = sor.known_venues();
    Json(sor.aggregate_depths(&symbol, &venues).await)
}

#[derive(Deserialize)]
struct RecordExecutionRequest {
    plan_id: String,
    route_id: String,
    filled_qty: Decimal,
    filled_price: Decimal,
    fee: Decimal,
    latency_ms: u64,
}

async fn record_execution(
    State(sor): State<Arc<SorRouter>>,
    Json(req): Json<RecordExecutionRequest>,
) -> CoreResult<Json<ExecutionReport>> {
    let report = sor
        .record_execution(&req.plan_id, &req.route_id, req.filled_qty, req.filled_price, req.fee, req.latency_ms)
        .await?;
    Ok(Json(report))
}
