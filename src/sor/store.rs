//! Persistence for SOR plans and execution reports.

use crate::errors::{CoreError, CoreResult};
use crate::risk::Side;
use crate::sor::plan::{ExecutionReport, OrderRoute, PlanStatus, SORPlan, Strategy};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct SorStore {
    conn: Arc<Mutex<Connection>>,
}

impl SorStore {
    pub fn open(path: &str) -> CoreResult<Self> {
        let conn = Connection::open(path).map_err(|e| CoreError::Internal(format!("open sor db: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| CoreError::Internal(format!("open sor db: {e}")))?;
        Self::migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn migrate(conn: &Connection) -> CoreResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sor_plans (
                plan_id TEXT PRIMARY KEY,
                parent_order_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                total_quantity TEXT NOT NULL,
                strategy TEXT NOT NULL,
                routes TEXT NOT NULL,
                average_price TEXT NOT NULL,
                expected_cost TEXT NOT NULL,
                total_fee TEXT NOT NULL,
                market_impact TEXT NOT NULL,
                confidence_score TEXT NOT NULL,
                status TEXT NOT NULL,
                generated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS execution_reports (
                report_id TEXT PRIMARY KEY,
                plan_id TEXT NOT NULL,
                route_id TEXT NOT NULL,
                venue_id TEXT NOT NULL,
                filled_qty TEXT NOT NULL,
                filled_price TEXT NOT NULL,
                fee TEXT NOT NULL,
                slippage TEXT NOT NULL,
                latency_ms INTEGER NOT NULL,
                executed_at TEXT NOT NULL
            );",
        )
        .map_err(|e| CoreError::Internal(format!("migrate sor db: {e}")))?;
        Ok(())
    }

    pub async fn insert_plan(&self, plan: &SORPlan) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let routes_json = serde_json::to_string(&plan.routes).map_err(|e| CoreError::Internal(e.to_string()))?;
        conn.execute(
            "INSERT INTO sor_plans (plan_id, parent_order_id, symbol, side, total_quantity, strategy, routes, average_price, expected_cost, total_fee, market_impact, confidence_score, status, generated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                plan.plan_id,
                plan.parent_order_id,
                plan.symbol,
                side_str(plan.side),
                plan.total_quantity.to_string(),
                strategy_str(plan.strategy),
                routes_json,
                plan.average_price.to_string(),
                plan.expected_cost.to_string(),
                plan.total_fee.to_string(),
                plan.market_impact.to_string(),
                plan.confidence_score.to_string(),
                status_str(plan.status),
                plan.generated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_plan(&self, plan_id: &str) -> CoreResult<Option<SORPlan>> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM sor_plans WHERE plan_id = ?1", params![plan_id], map_plan_row)
            .optional()
            .map_err(CoreError::from)
    }

    pub async fn insert_execution_report(&self, report: &ExecutionReport) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO execution_reports (report_id, plan_id, route_id, venue_id, filled_qty, filled_price, fee, slippage, latency_ms, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                report.report_id,
                report.plan_id,
                report.route_id,
                report.venue_id,
                report.filled_qty.to_string(),
                report.filled_price.to_string(),
                report.fee.to_string(),
                report.slippage.to_string(),
                report.latency_ms,
                report.executed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn dec(s: String) -> Decimal {
    Decimal::from_str(&s).unwrap_or_default()
}

fn map_plan_row(row: &rusqlite::Row) -> rusqlite::Result<SORPlan> {
    let routes_json: String = row.get("routes")?;
    let routes: Vec<OrderRoute> = serde_json::from_str(&routes_json).unwrap_or_default();
    let generated_at: String = row.get("generated_at")?;
    Ok(SORPlan {
        plan_id: row.get("plan_id")?,
        parent_order_id: row.get("parent_order_id")?,
        symbol: row.get("symbol")?,
        side: parse_side(&row.get::<_, String>("side")?),
        total_quantity: dec(row.get("total_quantity")?),
        strategy: parse_strategy(&row.get::<_, String>("strategy")?),
        routes,
        average_price: dec(row.get("average_price")?),
        expected_cost: dec(row.get("expected_cost")?),
        total_fee: dec(row.get("total_fee")?),
        market_impact: dec(row.get("market_impact")?),
        confidence_score: dec(row.get("confidence_score")?),
        status: parse_status(&row.get::<_, String>("status")?),
        generated_at: generated_at.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
    })
}

fn side_str(s: Side) -> &'static str {
    match s {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}
fn parse_side(s: &str) -> Side {
    if s == "SELL" { Side::Sell } else { Side::Buy }
}
fn strategy_str(s: Strategy) -> &'static str {
    match s {
        Strategy::BestPrice => "BEST_PRICE",
        Strategy::LowestFee => "LOWEST_FEE",
        Strategy::Fastest => "FASTEST",
        Strategy::SmartSplit => "SMART_SPLIT",
        Strategy::DarkPoolFirst => "DARK_POOL_FIRST",
    }
}
fn parse_strategy(s: &str) -> Strategy {
    match s {
        "LOWEST_FEE" => Strategy::LowestFee,
        "FASTEST" => Strategy::Fastest,
        "SMART_SPLIT" => Strategy::SmartSplit,
        "DARK_POOL_FIRST" => Strategy::DarkPoolFirst,
        _ => Strategy::BestPrice,
    }
}
fn status_str(s: PlanStatus) -> &'static str {
    match s {
        PlanStatus::Planned => "PLANNED",
        PlanStatus::Executing => "EXECUTING",
        PlanStatus::Completed => "COMPLETED",
        PlanStatus::Failed => "FAILED",
        PlanStatus::Cancelled => "CANCELLED",
    }
}
fn parse_status(s: &str) -> PlanStatus {
    match s {
        "EXECUTING" => PlanStatus::Executing,
        "COMPLETED" => PlanStatus::Completed,
        "FAILED" => PlanStatus::Failed,
        "CANCELLED" => PlanStatus::Cancelled,
        _ => PlanStatus::Planned,
    }
}
