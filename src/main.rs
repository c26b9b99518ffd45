//! Trading core backend.
//!
//! Boots the Treasury ledger, Custody vaults, Risk engine, Smart Order
//! Router, and Market-making runtime behind one HTTP surface, plus the
//! background liquidation loop and outbox dispatcher/janitor. Exits 0 on a
//! clean shutdown after SIGINT/SIGTERM; non-zero only on startup failure
//! (spec.md §6).

mod api;
mod auth;
mod clients;
mod concurrency;
mod config;
mod errors;
mod idgen;
mod ledger;
mod liquidation;
mod marketmaker;
mod middleware;
mod money;
mod outbox;
mod risk;
mod sor;
mod vault;

use crate::auth::JwtHandler;
use crate::concurrency::shutdown_channel;
use crate::config::Config;
use crate::ledger::{Ledger, LedgerStore};
use crate::liquidation::{AccountClient, LiquidationLoop, PositionClient};
use crate::marketmaker::MarketMakerRuntime;
use crate::middleware::rate_limit::{RateLimitConfig as HttpRateLimitConfig, RateLimitLayer};
use crate::outbox::{LoggingBus, OutboxBackend, OutboxDispatcher, OutboxJanitor};
use crate::risk::{RiskAssessor, RiskStore};
use crate::sor::{MarketDataClient, SorRouter, SorStore};
use crate::vault::{VaultService, VaultStore};
use anyhow::Result;
use clap::Parser;
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn service_url(cfg: &Config, name: &str, default: &str) -> String {
    cfg.services.targets.get(name).cloned().unwrap_or_else(|| default.to_string())
}

/// Operator-facing overrides layered on top of `config.toml` + `TRADECORE_*`
/// env vars, for the handful of values worth a flag at start-up.
#[derive(Parser, Debug)]
#[command(name = "trading-core")]
struct Cli {
    #[arg(long, env = "CONFIG_PATH")]
    config: Option<String>,
    #[arg(long, env = "TRADECORE_SERVER__HTTP_PORT")]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    if let Some(path) = &cli.config {
        std::env::set_var("CONFIG_PATH", path);
    }
    let mut cfg = Config::from_env()?;
    if let Some(port) = cli.http_port {
        cfg.server.http_port = port;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cfg.log.level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(http_port = cfg.server.http_port, "starting trading-core");

    let ledger_store = LedgerStore::open(&cfg.database.source)?;
    let vault_store = VaultStore::open(&cfg.database.source)?;
    let risk_store = RiskStore::open(&cfg.database.source)?;
    let sor_store = SorStore::open(&cfg.database.source)?;

    let ledger = Arc::new(Ledger::new(ledger_store.clone()));
    let vaults = Arc::new(VaultService::new(vault_store.clone()));
    let risk = Arc::new(RiskAssessor::new(risk_store));

    let market_data: Arc<dyn MarketDataClient> =
        Arc::new(clients::HttpMarketDataClient::new(service_url(&cfg, "market_data", "http://localhost:9101"), Vec::new()));
    let sor = Arc::new(SorRouter::new(market_data, sor_store));

    let mid_price = Arc::new(clients::HttpMidPriceClient::new(service_url(&cfg, "market_data", "http://localhost:9101")));
    let order_client = Arc::new(clients::HttpOrderClient::new(service_url(&cfg, "matching_engine", "http://localhost:9102")));
    let marketmaker = Arc::new(MarketMakerRuntime::new(mid_price, order_client, Duration::from_secs(1)));

    let (shutdown_handle, shutdown) = shutdown_channel();

    let account_client: Arc<dyn AccountClient> =
        Arc::new(clients::HttpAccountClient::new(service_url(&cfg, "account_client", "http://localhost:9103")));
    let position_client: Arc<dyn PositionClient> =
        Arc::new(clients::HttpPositionClient::new(service_url(&cfg, "position_client", "http://localhost:9104")));
    let liquidation_loop = LiquidationLoop::new(
        account_client,
        position_client,
        Duration::from_secs(cfg.liquidation.interval_secs),
        Decimal::try_from(cfg.liquidation.mm_threshold).unwrap_or(Decimal::new(110, 2)),
        Box::new(|event| {
            tracing::warn!(
                account_id = %event.account_id,
                symbol = %event.symbol,
                margin_level = %event.margin_level,
                "position liquidation triggered"
            );
        }),
    );
    let liquidation_shutdown = shutdown.clone();
    let liquidation_task = tokio::spawn(async move { liquidation_loop.run(liquidation_shutdown).await });

    let outbox_backends: Vec<Arc<dyn OutboxBackend>> = vec![Arc::new(ledger_store.clone()), Arc::new(vault_store.clone())];
    let dispatcher = OutboxDispatcher::new(
        outbox_backends.clone(),
        Arc::new(LoggingBus),
        cfg.outbox.batch_size,
        Duration::from_secs(cfg.outbox.dispatch_interval_secs),
    );
    let dispatcher_shutdown = shutdown.clone();
    let dispatcher_task = tokio::spawn(async move { dispatcher.run(dispatcher_shutdown).await });

    let janitor = OutboxJanitor::new(
        outbox_backends,
        chrono::Duration::days(cfg.outbox.retention_days as i64),
        Duration::from_secs(3600),
    );
    let janitor_shutdown = shutdown.clone();
    let janitor_task = tokio::spawn(async move { janitor.run(janitor_shutdown).await });

    let jwt = Arc::new(JwtHandler::new(cfg.auth.jwt_secret.clone()));
    let rate_limiter = RateLimitLayer::new(HttpRateLimitConfig {
        max_requests: cfg.rate_limit.rate,
        window: Duration::from_secs(1),
        burst: cfg.rate_limit.rate / 4,
    });

    let app = api::build_router(
        api::Services { ledger, vaults, risk, sor, marketmaker: marketmaker.clone() },
        jwt,
        rate_limiter,
        shutdown.clone(),
    );

    let addr = SocketAddr::from_str(&format!("0.0.0.0:{}", cfg.server.http_port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(wait_for_shutdown_signal(shutdown_handle))
        .await?;

    marketmaker.abort_all();
    let drain = tokio::time::timeout(Duration::from_secs(10), async {
        let _ = liquidation_task.await;
        let _ = dispatcher_task.await;
        let _ = janitor_task.await;
    })
    .await;
    if drain.is_err() {
        tracing::warn!("background tasks did not drain within 10s shutdown window");
    }

    info!("shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal(handle: crate::concurrency::ShutdownHandle) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining");
    handle.trigger();
}
