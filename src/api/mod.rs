//! HTTP surface: one thin router per service, mounted together under
//! `/api/v1/*` on a single `axum::Router` for this process (spec.md §6).

pub mod custody;
pub mod mm_api;
pub mod risk_api;
pub mod sor_api;
pub mod treasury;

use crate::auth::{auth_middleware, JwtHandler};
use crate::concurrency::ShutdownSignal;
use crate::ledger::Ledger;
use crate::marketmaker::MarketMakerRuntime;
use crate::middleware::rate_limit::{rate_limit_middleware, RateLimitLayer};
use crate::middleware::request_logging_simple;
use crate::risk::RiskAssessor;
use crate::sor::SorRouter;
use crate::vault::VaultService;
use axum::{middleware as axum_mw, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// The application services each service-group router is built from.
pub struct Services {
    pub ledger: Arc<Ledger>,
    pub vaults: Arc<VaultService>,
    pub risk: Arc<RiskAssessor>,
    pub sor: Arc<SorRouter>,
    pub marketmaker: Arc<MarketMakerRuntime>,
}

pub fn build_router(
    services: Services,
    jwt: Arc<JwtHandler>,
    rate_limiter: RateLimitLayer,
    shutdown: ShutdownSignal,
) -> Router {
    let authenticated = Router::new()
        .nest("/treasury", treasury::router(services.ledger))
        .nest("/custody", custody::router(services.vaults))
        .nest("/risk", risk_api::router(services.risk))
        .nest("/sor", sor_api::router(services.sor))
        .nest("/mm", mm_api::router(services.marketmaker, shutdown))
        .route_layer(axum_mw::from_fn_with_state(jwt, auth_middleware));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", authenticated)
        .route_layer(axum_mw::from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(axum_mw::from_fn(request_logging_simple))
        .layer(CorsLayer::permissive())
}

async fn health() -> &'static str {
    "ok"
}
