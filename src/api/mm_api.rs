//! Market-making HTTP surface (spec.md §6 "Market-making service").

use crate::concurrency::ShutdownSignal;
use crate::errors::{CoreError, CoreResult};
use crate::marketmaker::{MarketMakerRuntime, PerformanceCounters, QuoteStrategy, StrategyStatus};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone)]
struct MmState {
    runtime: Arc<MarketMakerRuntime>,
    shutdown: ShutdownSignal,
}

pub fn router(runtime: Arc<MarketMakerRuntime>, shutdown: ShutdownSignal) -> Router {
    Router::new()
        .route("/strategies", post(set_strategy))
        .route("/strategies/:symbol", get(get_strategy))
        .route("/strategies/:symbol/performance", get(get_performance))
        .with_state(MmState { runtime, shutdown })
}

#[derive(Deserialize)]
struct SetStrategyRequest {
    symbol: String,
    spread: Decimal,
    min_order_size: Decimal,
    max_order_size: Decimal,
    max_position: Decimal,
    status: StrategyStatus,
}

async fn set_strategy(State(state): State<MmState>, Json(req): Json<SetStrategyRequest>) -> Json<String> {
    let id = crate::idgen::new_id("mm");
    let strategy = QuoteStrategy {
        id: id.clone(),
        symbol: req.symbol,
        spread: req.spread,
        min_order_size: req.min_order_size,
        max_order_size: req.max_order_size,
        max_position: req.max_position,
        status: req.status,
    };
    state.runtime.set_strategy(strategy, state.shutdown.clone());
    Json(id)
}

async fn get_strategy(State(state): State<MmState>, Path(symbol): Path<String>) -> CoreResult<Json<StrategyStatus>> {
    state
        .runtime
        .get_status(&symbol)
        .map(Json)
        .ok_or_else(|| CoreError::NotFound(format!("no strategy running for {symbol}")))
}

async fn get_performance(State(state): State<MmState>, Path(symbol): Path<String>) -> Json<PerformanceCounters> {
    Json(state.runtime.get_performance(&symbol))
}
