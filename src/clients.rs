//! Thin JSON/HTTP adapters for the collaborator services the spec treats as
//! external (matching engine, market data, account/position sources;
//! spec.md §1, §9). Each adapter dials the base URL configured under
//! `services.<name>` in `config.toml`; wire framing beyond "plain JSON over
//! HTTP" is not specified, so these are a minimal, swappable default rather
//! than a protocol this repo owns.

use crate::liquidation::clients::{AccountClient, MarginAccount, Position, PositionClient, PositionSide};
use crate::marketmaker::quote_strategy::MakerSide;
use crate::marketmaker::runtime::{MidPriceClient, OrderClient};
use crate::sor::market_data::{MarketDataClient, VenueQuote};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

/// Account source backing the liquidation loop's MARGIN-account scan.
pub struct HttpAccountClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpAccountClient {
    pub fn new(base_url: String) -> Self {
        Self { base_url, http: reqwest::Client::new() }
    }
}

#[derive(Debug, Deserialize)]
struct AccountRow {
    account_id: String,
    user_id: String,
    balance: Decimal,
}

#[async_trait]
impl AccountClient for HttpAccountClient {
    async fn list_margin_accounts(&self, page: u32, page_size: u32) -> anyhow::Result<Vec<MarginAccount>> {
        let url = format!("{}/margin-accounts?page={page}&page_size={page_size}", self.base_url);
        let rows: Vec<AccountRow> = self.http.get(&url).send().await?.error_for_status()?.json().await?;
        Ok(rows
            .into_iter()
            .map(|r| MarginAccount { account_id: r.account_id, user_id: r.user_id, balance: r.balance })
            .collect())
    }
}

/// Position source backing the liquidation loop's per-account scan.
pub struct HttpPositionClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpPositionClient {
    pub fn new(base_url: String) -> Self {
        Self { base_url, http: reqwest::Client::new() }
    }
}

#[derive(Debug, Deserialize)]
struct PositionRow {
    symbol: String,
    side: String,
    quantity: Decimal,
    margin_requirement: Decimal,
    unrealized_pnl: Decimal,
}

#[async_trait]
impl PositionClient for HttpPositionClient {
    async fn list_positions(&self, account_id: &str) -> anyhow::Result<Vec<Position>> {
        let url = format!("{}/accounts/{account_id}/positions", self.base_url);
        let rows: Vec<PositionRow> = self.http.get(&url).send().await?.error_for_status()?.json().await?;
        rows.into_iter()
            .map(|r| {
                let side = match r.side.as_str() {
                    "LONG" => PositionSide::Long,
                    "SHORT" => PositionSide::Short,
                    other => anyhow::bail!("unknown position side {other}"),
                };
                Ok(Position {
                    symbol: r.symbol,
                    side,
                    quantity: r.quantity,
                    margin_requirement: r.margin_requirement,
                    unrealized_pnl: r.unrealized_pnl,
                })
            })
            .collect()
    }
}

/// Venue quote source backing the smart order router.
pub struct HttpMarketDataClient {
    base_url: String,
    venues: Vec<String>,
    http: reqwest::Client,
}

impl HttpMarketDataClient {
    pub fn new(base_url: String, venues: Vec<String>) -> Self {
        Self { base_url, venues, http: reqwest::Client::new() }
    }
}

#[derive(Debug, Deserialize)]
struct QuoteRow {
    is_dark_pool: bool,
    ask: Decimal,
    ask_size: Decimal,
    bid: Decimal,
    bid_size: Decimal,
    latency_ms: u64,
    fee_bps: Decimal,
}

#[async_trait]
impl MarketDataClient for HttpMarketDataClient {
    async fn get_quote(&self, venue_id: &str, symbol: &str) -> anyhow::Result<VenueQuote> {
        let url = format!("{}/venues/{venue_id}/quote?symbol={symbol}", self.base_url);
        let row: QuoteRow = self.http.get(&url).send().await?.error_for_status()?.json().await?;
        Ok(VenueQuote {
            venue_id: venue_id.to_string(),
            is_dark_pool: row.is_dark_pool,
            ask: row.ask,
            ask_size: row.ask_size,
            bid: row.bid,
            bid_size: row.bid_size,
            latency_ms: row.latency_ms,
            fee_bps: row.fee_bps,
        })
    }

    fn known_venues(&self) -> Vec<String> {
        self.venues.clone()
    }
}

/// Mid-price source backing the market-making runtime's quote tick.
pub struct HttpMidPriceClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpMidPriceClient {
    pub fn new(base_url: String) -> Self {
        Self { base_url, http: reqwest::Client::new() }
    }
}

#[derive(Debug, Deserialize)]
struct MidPriceRow {
    mid_price: Decimal,
}

#[async_trait]
impl MidPriceClient for HttpMidPriceClient {
    async fn mid_price(&self, symbol: &str) -> anyhow::Result<Decimal> {
        let url = format!("{}/symbols/{symbol}/mid-price", self.base_url);
        let row: MidPriceRow = self.http.get(&url).send().await?.error_for_status()?.json().await?;
        Ok(row.mid_price)
    }
}

/// Order-placement sink backing the market-making runtime's quote tick.
pub struct HttpOrderClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpOrderClient {
    pub fn new(base_url: String) -> Self {
        Self { base_url, http: reqwest::Client::new() }
    }
}

#[async_trait]
impl OrderClient for HttpOrderClient {
    async fn place_order(&self, symbol: &str, side: MakerSide, price: Decimal, quantity: Decimal) -> anyhow::Result<()> {
        let url = format!("{}/orders", self.base_url);
        let side = match side {
            MakerSide::Buy => "BUY",
            MakerSide::Sell => "SELL",
        };
        self.http
            .post(&url)
            .json(&serde_json::json!({"symbol": symbol, "side": side, "price": price, "quantity": quantity}))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
