//! Smart order router: venue aggregation, route construction, strategy
//! tie-break, and optimization (spec.md §4.5).

use crate::errors::{CoreError, CoreResult};
use crate::risk::Side;
use crate::sor::market_data::{MarketDataClient, VenueQuote};
use crate::sor::plan::{ExecutionReport, OrderRoute, PlanStatus, SORPlan, Strategy};
use crate::sor::store::SorStore;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

const MAX_VENUES: usize = 8;
const VENUE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MIN_FILL_RATE: Decimal = dec!(0.1);

#[derive(Debug, Clone, Default)]
pub struct RouteConstraints {
    pub venue_filter: Option<Vec<String>>,
    pub allow_dark_pool: bool,
    pub min_fill_rate: Option<Decimal>,
}

pub struct SorRouter {
    market_data: Arc<dyn MarketDataClient>,
    store: SorStore,
}

struct BookLevel {
    venue_id: String,
    is_dark_pool: bool,
    price: Decimal,
    size: Decimal,
    fee_bps: Decimal,
    latency_ms: u64,
}

impl SorRouter {
    pub fn new(market_data: Arc<dyn MarketDataClient>, store: SorStore) -> Self {
        Self { market_data, store }
    }

    pub async fn aggregate_depths(&self, symbol: &str, venues: &[String]) -> Vec<VenueQuote> {
        self.probe_venues(symbol, venues).await
    }

    pub fn known_venues(&self) -> Vec<String> {
        self.market_data.known_venues()
    }

    async fn probe_venues(&self, symbol: &str, venues: &[String]) -> Vec<VenueQuote> {
        let semaphore = Arc::new(Semaphore::new(MAX_VENUES));
        let mut handles = Vec::with_capacity(venues.len());
        for venue_id in venues {
            let md = self.market_data.clone();
            let venue_id = venue_id.clone();
            let symbol = symbol.to_string();
            let sem = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok()?;
                match tokio::time::timeout(VENUE_TIMEOUT, md.get_quote(&venue_id, &symbol)).await {
                    Ok(Ok(quote)) => Some(quote),
                    Ok(Err(e)) => {
                        warn!(venue_id, error = %e, "venue probe failed, dropping");
                        None
                    }
                    Err(_) => {
                        warn!(venue_id, "venue probe timed out, dropping");
                        None
                    }
                }
            }));
        }
        let mut quotes = Vec::new();
        for handle in handles {
            if let Ok(Some(quote)) = handle.await {
                quotes.push(quote);
            }
        }
        quotes
    }

    pub async fn create_plan(
        &self,
        parent_order_id: &str,
        symbol: &str,
        side: Side,
        total_quantity: Decimal,
        strategy: Strategy,
        constraints: RouteConstraints,
    ) -> CoreResult<SORPlan> {
        if total_quantity <= Decimal::ZERO {
            return Err(CoreError::InvalidArgument("total_quantity must be positive".into()));
        }
        let venues = constraints.venue_filter.clone().unwrap_or_else(|| self.market_data.known_venues());
        let quotes = self.probe_venues(symbol, &venues).await;

        let mut levels: Vec<BookLevel> = quotes
            .into_iter()
            .filter(|q| constraints.allow_dark_pool || !q.is_dark_pool)
            .map(|q| {
                let (price, size) = match side {
                    Side::Buy => (q.ask, q.ask_size),
                    Side::Sell => (q.bid, q.bid_size),
                };
                BookLevel { venue_id: q.venue_id, is_dark_pool: q.is_dark_pool, price, size, fee_bps: q.fee_bps, latency_ms: q.latency_ms }
            })
            .filter(|l| l.size > Decimal::ZERO)
            .collect();

        if levels.is_empty() {
            return Err(CoreError::NoLiquidity(format!("no venue quoted {symbol}")));
        }

        sort_by_strategy(&mut levels, strategy, side);

        let min_fill_rate = constraints.min_fill_rate.unwrap_or(DEFAULT_MIN_FILL_RATE);
        let mut routes = Vec::new();
        let mut remaining = total_quantity;
        for level in &levels {
            if remaining <= Decimal::ZERO {
                break;
            }
            let take = remaining.min(level.size);
            let notional = level.price * take;
            let fee = notional * level.fee_bps / dec!(10000);
            let expected_fill = (take / level.size).min(Decimal::ONE);
            routes.push(OrderRoute {
                route_id: crate::idgen::new_id("route"),
                venue_id: level.venue_id.clone(),
                price: level.price,
                quantity: take,
                fee,
                expected_fill,
            });
            remaining -= take;
        }

        if remaining > Decimal::ZERO {
            return Err(CoreError::NoLiquidity(format!(
                "only {} of {total_quantity} {symbol} available across probed venues",
                total_quantity - remaining
            )));
        }

        let routes = optimize_routes(routes, min_fill_rate);
        if routes.is_empty() {
            return Err(CoreError::NoLiquidity(format!("no route for {symbol} met min_fill_rate")));
        }

        let filled_quantity: Decimal = routes.iter().map(|r| r.quantity).sum();
        let average_price = routes.iter().map(|r| r.price * r.quantity).sum::<Decimal>() / filled_quantity;
        let total_fee: Decimal = routes.iter().map(|r| r.fee).sum();
        let expected_cost = average_price * filled_quantity + total_fee;

        let total_depth: Decimal = levels.iter().map(|l| l.size).sum();
        let market_impact = if total_depth > Decimal::ZERO { (total_quantity / total_depth).min(Decimal::ONE) } else { Decimal::ONE };

        let venue_count = routes.len();
        let avg_expected_fill = routes.iter().map(|r| r.expected_fill).sum::<Decimal>() / Decimal::from(venue_count as i64);
        let confidence_score = dec!(0.4) * avg_expected_fill
            + dec!(0.3) * (Decimal::from(venue_count as i64) / dec!(5)).min(Decimal::ONE)
            + dec!(0.3) * (Decimal::ONE - total_fee / expected_cost).max(Decimal::ZERO);

        let plan = SORPlan {
            plan_id: crate::idgen::new_id("plan"),
            parent_order_id: parent_order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            total_quantity,
            strategy,
            routes,
            average_price,
            expected_cost,
            total_fee,
            market_impact,
            confidence_score,
            status: PlanStatus::Planned,
            generated_at: Utc::now(),
        };
        self.store.insert_plan(&plan).await?;
        Ok(plan)
    }

    /// Records a fill against one route of a plan and computes slippage
    /// relative to the plan's average price (spec.md §4.5: `slippage =
    /// (filled_price − plan.average_price) / plan.average_price`).
    pub async fn record_execution(
        &self,
        plan_id: &str,
        route_id: &str,
        filled_qty: Decimal,
        filled_price: Decimal,
        fee: Decimal,
        latency_ms: u64,
    ) -> CoreResult<ExecutionReport> {
        let plan = self.store.get_plan(plan_id).await?.ok_or_else(|| CoreError::NotFound(format!("plan {plan_id}")))?;
        let route = plan
            .routes
            .iter()
            .find(|r| r.route_id == route_id)
            .ok_or_else(|| CoreError::NotFound(format!("route {route_id} in plan {plan_id}")))?;
        if plan.average_price == Decimal::ZERO {
            return Err(CoreError::PreconditionFailed(format!("plan {plan_id} has zero average_price")));
        }
        let slippage = (filled_price - plan.average_price) / plan.average_price;

        let report = ExecutionReport {
            report_id: crate::idgen::new_id("exec"),
            plan_id: plan_id.to_string(),
            route_id: route_id.to_string(),
            venue_id: route.venue_id.clone(),
            filled_qty,
            filled_price,
            fee,
            slippage,
            latency_ms,
            executed_at: Utc::now(),
        };
        self.store.insert_execution_report(&report).await?;
        Ok(report)
    }
}

/// Tie-breaks equivalent candidate levels per spec.md §4.5 step 3.
fn sort_by_strategy(levels: &mut [BookLevel], strategy: Strategy, side: Side) {
    match strategy {
        Strategy::BestPrice => levels.sort_by(|a, b| match side {
            Side::Buy => a.price.cmp(&b.price),
            Side::Sell => b.price.cmp(&a.price),
        }),
        Strategy::LowestFee => levels.sort_by(|a, b| a.fee_bps.cmp(&b.fee_bps)),
        Strategy::Fastest => levels.sort_by(|a, b| a.latency_ms.cmp(&b.latency_ms)),
        Strategy::SmartSplit => {
            let weighted = |l: &BookLevel| dec!(0.5) * l.price + dec!(0.3) * l.fee_bps + dec!(0.2) * Decimal::from(l.latency_ms);
            levels.sort_by(|a, b| weighted(a).cmp(&weighted(b)));
        }
        Strategy::DarkPoolFirst => levels.sort_by(|a, b| match (a.is_dark_pool, b.is_dark_pool) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => match side {
                Side::Buy => a.price.cmp(&b.price),
                Side::Sell => b.price.cmp(&a.price),
            },
        }),
    }
}

/// Merges adjacent same-venue routes, drops routes below `min_fill_rate`
/// (spec.md §4.5 step 4). Falls back to the unoptimized list if that would
/// drop everything.
fn optimize_routes(routes: Vec<OrderRoute>, min_fill_rate: Decimal) -> Vec<OrderRoute> {
    let mut merged: Vec<OrderRoute> = Vec::with_capacity(routes.len());
    for route in routes {
        if let Some(last) = merged.last_mut() {
            if last.venue_id == route.venue_id {
                let total_qty = last.quantity + route.quantity;
                last.price = (last.price * last.quantity + route.price * route.quantity) / total_qty;
                last.quantity = total_qty;
                last.fee += route.fee;
                last.expected_fill = (last.expected_fill + route.expected_fill) / dec!(2);
                continue;
            }
        }
        merged.push(route);
    }

    let filtered: Vec<OrderRoute> = merged.iter().cloned().filter(|r| r.expected_fill >= min_fill_rate).collect();
    if filtered.is_empty() {
        merged
    } else {
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct TwoVenues;

    #[async_trait]
    impl MarketDataClient for TwoVenues {
        async fn get_quote(&self, venue_id: &str, _symbol: &str) -> anyhow::Result<VenueQuote> {
            match venue_id {
                "V1" => Ok(VenueQuote {
                    venue_id: "V1".into(),
                    is_dark_pool: false,
                    ask: dec!(100),
                    ask_size: dec!(30),
                    bid: dec!(99),
                    bid_size: dec!(30),
                    latency_ms: 20,
                    fee_bps: dec!(1),
                }),
                "V2" => Ok(VenueQuote {
                    venue_id: "V2".into(),
                    is_dark_pool: false,
                    ask: dec!(101),
                    ask_size: dec!(50),
                    bid: dec!(98),
                    bid_size: dec!(50),
                    latency_ms: 35,
                    fee_bps: dec!(1),
                }),
                other => anyhow::bail!("unknown venue {other}"),
            }
        }

        fn known_venues(&self) -> Vec<String> {
            vec!["V1".into(), "V2".into()]
        }
    }

    fn router() -> SorRouter {
        SorRouter::new(Arc::new(TwoVenues), SorStore::open_in_memory().unwrap())
    }

    /// S5 — SOR split across two venues under BEST_PRICE.
    #[tokio::test]
    async fn s5_sor_split_best_price() {
        let router = router();
        let plan = router
            .create_plan("order-1", "AAA", Side::Buy, dec!(60), Strategy::BestPrice, RouteConstraints::default())
            .await
            .unwrap();

        assert_eq!(plan.routes.len(), 2);
        assert_eq!(plan.routes[0].venue_id, "V1");
        assert_eq!(plan.routes[0].quantity, dec!(30));
        assert_eq!(plan.routes[1].venue_id, "V2");
        assert_eq!(plan.routes[1].quantity, dec!(30));
        assert_eq!(plan.average_price, dec!(100.5));
        assert!(plan.invariant_holds());
    }

    #[tokio::test]
    async fn record_execution_computes_slippage() {
        let router = router();
        let plan = router
            .create_plan("order-1", "AAA", Side::Buy, dec!(30), Strategy::BestPrice, RouteConstraints::default())
            .await
            .unwrap();
        assert_eq!(plan.average_price, dec!(100));

        let route = &plan.routes[0];
        let report = router
            .record_execution(&plan.plan_id, &route.route_id, dec!(30), dec!(101), dec!(0.3), 15)
            .await
            .unwrap();
        assert_eq!(report.venue_id, "V1");
        assert_eq!(report.slippage, dec!(0.01)); // (101 - 100) / 100
    }

    #[tokio::test]
    async fn no_liquidity_when_total_exceeds_depth() {
        let router = router();
        let err = router
            .create_plan("order-2", "AAA", Side::Buy, dec!(1000), Strategy::BestPrice, RouteConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoLiquidity(_)));
    }

    #[tokio::test]
    async fn no_liquidity_when_no_venues_respond() {
        struct Nobody;
        #[async_trait]
        impl MarketDataClient for Nobody {
            async fn get_quote(&self, _venue_id: &str, _symbol: &str) -> anyhow::Result<VenueQuote> {
                anyhow::bail!("down")
            }
            fn known_venues(&self) -> Vec<String> {
                vec!["V9".into()]
            }
        }
        let router = SorRouter::new(Arc::new(Nobody), SorStore::open_in_memory().unwrap());
        let err = router
            .create_plan("order-3", "AAA", Side::Buy, dec!(10), Strategy::BestPrice, RouteConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoLiquidity(_)));
    }
}
