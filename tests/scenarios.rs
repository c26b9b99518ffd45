//! End-to-end scenario tests driven through the real HTTP surface
//! (spec.md §8 scenarios S1 and S6 — the invariants that need the whole
//! stack wired together, not just one module in isolation).

use axum::body::Body;
use axum::http::{Request, StatusCode};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use trading_core_backend::auth::models::{User, UserRole};
use trading_core_backend::auth::JwtHandler;
use trading_core_backend::concurrency::shutdown_channel;
use trading_core_backend::ledger::{Ledger, LedgerStore};
use trading_core_backend::marketmaker::MarketMakerRuntime;
use trading_core_backend::middleware::rate_limit::{RateLimitConfig, RateLimitLayer};
use trading_core_backend::risk::{RiskAssessor, RiskStore};
use trading_core_backend::sor::{MarketDataClient, SorRouter, SorStore, VenueQuote};
use trading_core_backend::vault::{VaultService, VaultStore};
use trading_core_backend::{api, marketmaker};

struct NoVenues;
#[async_trait::async_trait]
impl MarketDataClient for NoVenues {
    async fn get_quote(&self, _venue_id: &str, _symbol: &str) -> anyhow::Result<VenueQuote> {
        anyhow::bail!("no venues configured in this test")
    }
    fn known_venues(&self) -> Vec<String> {
        Vec::new()
    }
}

struct NoMidPrice;
#[async_trait::async_trait]
impl marketmaker::MidPriceClient for NoMidPrice {
    async fn mid_price(&self, _symbol: &str) -> anyhow::Result<Decimal> {
        anyhow::bail!("no mid price source in this test")
    }
}

struct NoOrders;
#[async_trait::async_trait]
impl marketmaker::OrderClient for NoOrders {
    async fn place_order(&self, _symbol: &str, _side: marketmaker::MakerSide, _price: Decimal, _quantity: Decimal) -> anyhow::Result<()> {
        Ok(())
    }
}

fn test_app() -> axum::Router {
    let ledger = Arc::new(Ledger::new(LedgerStore::open_in_memory().unwrap()));
    let vaults = Arc::new(VaultService::new(VaultStore::open_in_memory().unwrap()));
    let risk = Arc::new(RiskAssessor::new(RiskStore::open_in_memory().unwrap()));
    let sor = Arc::new(SorRouter::new(Arc::new(NoVenues), SorStore::open_in_memory().unwrap()));
    let mm = Arc::new(MarketMakerRuntime::new(Arc::new(NoMidPrice), Arc::new(NoOrders), std::time::Duration::from_secs(1)));

    let jwt = Arc::new(JwtHandler::new("test-secret".to_string()));
    let rate_limiter = RateLimitLayer::new(RateLimitConfig { max_requests: 1_000, window: std::time::Duration::from_secs(1), burst: 1_000 });
    let (_handle, shutdown) = shutdown_channel();

    api::build_router(api::Services { ledger, vaults, risk, sor, marketmaker: mm }, jwt.clone(), rate_limiter, shutdown)
}

fn bearer_token() -> String {
    let jwt = JwtHandler::new("test-secret".to_string());
    let user = User {
        id: uuid::Uuid::new_v4(),
        username: "trader-1".to_string(),
        password_hash: "unused".to_string(),
        role: UserRole::Trader,
        api_key: None,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    jwt.generate_token(&user).unwrap().0
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn authed_json(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// S1 — Freeze/Deduct on spot buy, driven entirely over HTTP.
#[tokio::test]
async fn s1_freeze_then_deduct_over_http() {
    let app = test_app();
    let token = bearer_token();

    let resp = app
        .clone()
        .oneshot(authed_json(
            "POST",
            "/api/v1/treasury/accounts",
            &token,
            json!({"owner_id": "user-1", "account_type": "SPOT", "currency": "USD"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let account = json_body(resp).await;
    let account_id = account["account_id"].as_str().unwrap().to_string();

    let deposit_uri = format!("/api/v1/treasury/accounts/{account_id}/deposit");
    let resp = app
        .clone()
        .oneshot(authed_json("POST", &deposit_uri, &token, json!({"amount": "1000.00", "ref_id": "dep-1"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let freeze_uri = format!("/api/v1/treasury/accounts/{account_id}/freeze");
    let resp = app
        .clone()
        .oneshot(authed_json("POST", &freeze_uri, &token, json!({"amount": "300.00", "ref_id": "ord-1"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let deduct_uri = format!("/api/v1/treasury/accounts/{account_id}/deduct");
    let resp = app
        .clone()
        .oneshot(authed_json("POST", &deduct_uri, &token, json!({"amount": "300.00", "ref_id": "ord-1", "from_frozen": true})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let balance_uri = format!("/api/v1/treasury/accounts/{account_id}");
    let resp = app
        .clone()
        .oneshot(Request::builder().uri(&balance_uri).header("authorization", format!("Bearer {token}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let balance = json_body(resp).await;
    assert_eq!(balance["balance"], "700.00");
    assert_eq!(balance["available"], "700.00");
    assert_eq!(balance["frozen"], "0.00");
}

/// S6 — Corporate action 2-for-1 split, driven entirely over HTTP.
#[tokio::test]
async fn s6_corp_action_split_over_http() {
    let app = test_app();
    let token = bearer_token();

    let make_vault = |vault_type: &'static str, user_id: Option<&'static str>| {
        json!({"vault_type": vault_type, "user_id": user_id, "symbol": "X"})
    };

    let resp = app
        .clone()
        .oneshot(authed_json("POST", "/api/v1/custody/vaults/find-or-create", &token, make_vault("CUSTOMER", Some("user-1"))))
        .await
        .unwrap();
    let customer_vault = json_body(resp).await;
    let customer_vault_id = customer_vault["vault_id"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(authed_json("POST", "/api/v1/custody/vaults/find-or-create", &token, make_vault("HOUSE", None)))
        .await
        .unwrap();
    let house_vault = json_body(resp).await;
    let house_vault_id = house_vault["vault_id"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(authed_json(
            "POST",
            "/api/v1/custody/transfer",
            &token,
            json!({"from_vault": house_vault_id, "to_vault": customer_vault_id, "symbol": "X", "amount": 100, "reason": "seed"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let now = chrono::Utc::now();
    let yesterday = now - chrono::Duration::days(1);
    let resp = app
        .clone()
        .oneshot(authed_json(
            "POST",
            "/api/v1/custody/corp-actions",
            &token,
            json!({
                "symbol": "X",
                "action_type": "SPLIT",
                "ratio": "2.0",
                "record_date": yesterday.to_rfc3339(),
                "ex_date": yesterday.to_rfc3339(),
                "pay_date": now.to_rfc3339(),
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let action = json_body(resp).await;
    let action_id = action["action_id"].as_str().unwrap().to_string();

    let execute_uri = format!("/api/v1/custody/corp-actions/{action_id}/execute");
    let resp = app.clone().oneshot(authed_json("POST", &execute_uri, &token, json!({}))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let holding_uri = format!("/api/v1/custody/vaults/{customer_vault_id}");
    let resp = app
        .clone()
        .oneshot(Request::builder().uri(&holding_uri).header("authorization", format!("Bearer {token}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let holding = json_body(resp).await;
    assert_eq!(holding["balance"], 200);
}

#[tokio::test]
async fn unauthenticated_request_is_rejected() {
    let app = test_app();
    let resp = app
        .oneshot(Request::builder().uri("/api/v1/treasury/accounts/missing").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
