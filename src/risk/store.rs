//! Persistence for risk assessments, limits, circuit breakers, and alerts.

use crate::errors::{CoreError, CoreResult};
use crate::risk::model::{
    CircuitBreaker, LimitType, RiskAlert, RiskAssessment, RiskLevel, RiskLimit, Severity, Side,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::str::FromStr;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct RiskStore {
    conn: Arc<Mutex<Connection>>,
}

impl RiskStore {
    pub fn open(path: &str) -> CoreResult<Self> {
        let conn = Connection::open(path).map_err(|e| CoreError::Internal(format!("open risk db: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| CoreError::Internal(format!("open risk db: {e}")))?;
        Self::migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn migrate(conn: &Connection) -> CoreResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS risk_assessments (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                risk_level TEXT NOT NULL,
                risk_score TEXT NOT NULL,
                margin_requirement TEXT NOT NULL,
                is_allowed INTEGER NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS risk_limits (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                limit_type TEXT NOT NULL,
                limit_value TEXT NOT NULL,
                current_value TEXT NOT NULL,
                is_exceeded INTEGER NOT NULL,
                UNIQUE(user_id, limit_type)
            );
            CREATE TABLE IF NOT EXISTS risk_circuit_breakers (
                user_id TEXT PRIMARY KEY,
                is_fired INTEGER NOT NULL,
                trigger_reason TEXT NOT NULL,
                fired_at TEXT,
                auto_reset_at TEXT
            );
            CREATE TABLE IF NOT EXISTS risk_alerts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )
        .map_err(|e| CoreError::Internal(format!("migrate risk db: {e}")))?;
        Ok(())
    }

    pub async fn get_circuit_breaker(&self, user_id: &str) -> CoreResult<Option<CircuitBreaker>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM risk_circuit_breakers WHERE user_id = ?1",
            params![user_id],
            map_breaker_row,
        )
        .optional()
        .map_err(CoreError::from)
    }

    pub async fn set_circuit_breaker(&self, breaker: &CircuitBreaker) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO risk_circuit_breakers (user_id, is_fired, trigger_reason, fired_at, auto_reset_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                is_fired = excluded.is_fired,
                trigger_reason = excluded.trigger_reason,
                fired_at = excluded.fired_at,
                auto_reset_at = excluded.auto_reset_at",
            params![
                breaker.user_id,
                breaker.is_fired as i64,
                breaker.trigger_reason,
                breaker.fired_at.map(|t| t.to_rfc3339()),
                breaker.auto_reset_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub async fn get_limit(&self, user_id: &str, limit_type: LimitType) -> CoreResult<Option<RiskLimit>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM risk_limits WHERE user_id = ?1 AND limit_type = ?2",
            params![user_id, limit_type_str(limit_type)],
            map_limit_row,
        )
        .optional()
        .map_err(CoreError::from)
    }

    pub async fn upsert_limit(&self, limit: &RiskLimit) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO risk_limits (id, user_id, limit_type, limit_value, current_value, is_exceeded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, limit_type) DO UPDATE SET
                limit_value = excluded.limit_value,
                current_value = excluded.current_value,
                is_exceeded = excluded.is_exceeded",
            params![
                limit.id,
                limit.user_id,
                limit_type_str(limit.limit_type),
                limit.limit_value.to_string(),
                limit.current_value.to_string(),
                limit.is_exceeded as i64,
            ],
        )?;
        Ok(())
    }

    pub async fn insert_assessment(&self, a: &RiskAssessment) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO risk_assessments (id, user_id, symbol, side, quantity, price, risk_level, risk_score, margin_requirement, is_allowed, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                a.id,
                a.user_id,
                a.symbol,
                side_str(a.side),
                a.quantity.to_string(),
                a.price.to_string(),
                level_str(a.risk_level),
                a.risk_score.to_string(),
                a.margin_requirement.to_string(),
                a.is_allowed as i64,
                a.reason,
                a.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn insert_alert(&self, alert: &RiskAlert) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO risk_alerts (id, user_id, alert_type, severity, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                alert.id,
                alert.user_id,
                alert.alert_type,
                severity_str(alert.severity),
                alert.message,
                alert.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn list_alerts(&self, user_id: &str, limit: u32) -> CoreResult<Vec<RiskAlert>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM risk_alerts WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], map_alert_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn list_assessments(&self, user_id: &str) -> CoreResult<Vec<RiskAssessment>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM risk_assessments WHERE user_id = ?1 ORDER BY created_at DESC")?;
        let rows = stmt.query_map(params![user_id], map_assessment_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn dec(s: String) -> Decimal {
    Decimal::from_str(&s).unwrap_or_default()
}

fn map_breaker_row(row: &rusqlite::Row) -> rusqlite::Result<CircuitBreaker> {
    let fired_at: Option<String> = row.get("fired_at")?;
    let auto_reset_at: Option<String> = row.get("auto_reset_at")?;
    Ok(CircuitBreaker {
        user_id: row.get("user_id")?,
        is_fired: row.get::<_, i64>("is_fired")? != 0,
        trigger_reason: row.get("trigger_reason")?,
        fired_at: fired_at.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        auto_reset_at: auto_reset_at.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
    })
}

fn map_limit_row(row: &rusqlite::Row) -> rusqlite::Result<RiskLimit> {
    Ok(RiskLimit {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        limit_type: parse_limit_type(&row.get::<_, String>("limit_type")?),
        limit_value: dec(row.get("limit_value")?),
        current_value: dec(row.get("current_value")?),
        is_exceeded: row.get::<_, i64>("is_exceeded")? != 0,
    })
}

fn map_assessment_row(row: &rusqlite::Row) -> rusqlite::Result<RiskAssessment> {
    let created_at: String = row.get("created_at")?;
    Ok(RiskAssessment {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        symbol: row.get("symbol")?,
        side: parse_side(&row.get::<_, String>("side")?),
        quantity: dec(row.get("quantity")?),
        price: dec(row.get("price")?),
        risk_level: parse_level(&row.get::<_, String>("risk_level")?),
        risk_score: dec(row.get("risk_score")?),
        margin_requirement: dec(row.get("margin_requirement")?),
        is_allowed: row.get::<_, i64>("is_allowed")? != 0,
        reason: row.get("reason")?,
        created_at: created_at.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
    })
}

fn map_alert_row(row: &rusqlite::Row) -> rusqlite::Result<RiskAlert> {
    let created_at: String = row.get("created_at")?;
    Ok(RiskAlert {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        alert_type: row.get("alert_type")?,
        severity: parse_severity(&row.get::<_, String>("severity")?),
        message: row.get("message")?,
        created_at: created_at.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
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
fn level_str(l: RiskLevel) -> &'static str {
    match l {
        RiskLevel::Low => "LOW",
        RiskLevel::Medium => "MEDIUM",
        RiskLevel::High => "HIGH",
        RiskLevel::Critical => "CRITICAL",
    }
}
fn parse_level(s: &str) -> RiskLevel {
    match s {
        "MEDIUM" => RiskLevel::Medium,
        "HIGH" => RiskLevel::High,
        "CRITICAL" => RiskLevel::Critical,
        _ => RiskLevel::Low,
    }
}
fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Info => "INFO",
        Severity::Warn => "WARN",
        Severity::High => "HIGH",
        Severity::Critical => "CRITICAL",
    }
}
fn parse_severity(s: &str) -> Severity {
    match s {
        "WARN" => Severity::Warn,
        "HIGH" => Severity::High,
        "CRITICAL" => Severity::Critical,
        _ => Severity::Info,
    }
}
fn limit_type_str(t: LimitType) -> &'static str {
    match t {
        LimitType::MaxSingleOrderValue => "MAX_SINGLE_ORDER_VALUE",
        LimitType::MaxDailyLoss => "MAX_DAILY_LOSS",
        LimitType::PositionSize => "POSITION_SIZE",
        LimitType::Leverage => "LEVERAGE",
    }
}
fn parse_limit_type(s: &str) -> LimitType {
    match s {
        "MAX_DAILY_LOSS" => LimitType::MaxDailyLoss,
        "POSITION_SIZE" => LimitType::PositionSize,
        "LEVERAGE" => LimitType::Leverage,
        _ => LimitType::MaxSingleOrderValue,
    }
}
