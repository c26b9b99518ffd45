//! Persistence for the custody vault aggregate, following the same
//! single-connection pattern as `ledger::store` (grounded in the teacher's
//! `vault::vault_db::VaultDb`).

use crate::errors::{CoreError, CoreResult};
use crate::outbox::OutboxBackend;
use crate::vault::model::{
    AssetVault, CorpAction, CorpActionStatus, CorpActionType, CustodyTransfer, VaultType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct VaultStore {
    conn: Arc<Mutex<Connection>>,
}

impl VaultStore {
    pub fn open(path: &str) -> CoreResult<Self> {
        let conn = Connection::open(path).map_err(|e| CoreError::Internal(format!("open vault db: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| CoreError::Internal(format!("open vault db: {e}")))?;
        Self::migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn migrate(conn: &Connection) -> CoreResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS asset_vaults (
                vault_id TEXT PRIMARY KEY,
                vault_type TEXT NOT NULL,
                user_id TEXT,
                symbol TEXT NOT NULL,
                balance INTEGER NOT NULL,
                locked INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(vault_type, user_id, symbol)
            );
            CREATE TABLE IF NOT EXISTS custody_transfers (
                transfer_id TEXT PRIMARY KEY,
                from_vault TEXT NOT NULL,
                to_vault TEXT NOT NULL,
                symbol TEXT NOT NULL,
                amount INTEGER NOT NULL,
                reason TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS corp_actions (
                action_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                action_type TEXT NOT NULL,
                ratio TEXT NOT NULL,
                record_date TEXT NOT NULL,
                ex_date TEXT NOT NULL,
                pay_date TEXT NOT NULL,
                status TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS asset_vaults_outbox_messages (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                sent_at TEXT
            );",
        )
        .map_err(|e| CoreError::Internal(format!("migrate vault db: {e}")))?;
        Ok(())
    }

    pub async fn find_or_create_vault(
        &self,
        vault_type: VaultType,
        user_id: Option<&str>,
        symbol: &str,
    ) -> CoreResult<AssetVault> {
        let conn = self.conn.lock().await;
        let vault_id = crate::idgen::new_id("vault");
        let now = Utc::now();
        conn.execute(
            "INSERT OR IGNORE INTO asset_vaults (vault_id, vault_type, user_id, symbol, balance, locked, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, 0, ?5)",
            params![vault_id, type_str(vault_type), user_id, symbol, now.to_rfc3339()],
        )?;
        conn.query_row(
            "SELECT * FROM asset_vaults WHERE vault_type = ?1 AND user_id IS ?2 AND symbol = ?3",
            params![type_str(vault_type), user_id, symbol],
            map_vault_row,
        )
        .map_err(CoreError::from)
    }

    pub async fn get_vault(&self, vault_id: &str) -> CoreResult<Option<AssetVault>> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM asset_vaults WHERE vault_id = ?1", params![vault_id], map_vault_row)
            .optional()
            .map_err(CoreError::from)
    }

    pub async fn save_vault(&self, vault: &AssetVault) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE asset_vaults SET balance = ?1, locked = ?2, updated_at = ?3 WHERE vault_id = ?4",
            params![vault.balance, vault.locked, vault.updated_at.to_rfc3339(), vault.vault_id],
        )?;
        Ok(())
    }

    pub async fn list_vaults_for_symbol(&self, symbol: &str, exclude: VaultType) -> CoreResult<Vec<AssetVault>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM asset_vaults WHERE symbol = ?1 AND vault_type != ?2",
        )?;
        let rows = stmt
            .query_map(params![symbol, type_str(exclude)], map_vault_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn list_omnibus_vaults_for_user_assets(&self) -> CoreResult<Vec<AssetVault>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM asset_vaults WHERE vault_type = 'OMNIBUS'")?;
        let rows = stmt.query_map([], map_vault_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn insert_transfer(&self, transfer: &CustodyTransfer) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO custody_transfers (transfer_id, from_vault, to_vault, symbol, amount, reason, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                transfer.transfer_id,
                transfer.from_vault,
                transfer.to_vault,
                transfer.symbol,
                transfer.amount,
                transfer.reason,
                transfer.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn insert_outbox(&self, event_id: &str, event_type: &str, payload: &str) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO asset_vaults_outbox_messages (id, event_id, event_type, payload, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
            params![crate::idgen::new_id("obx"), event_id, event_type, payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn announce_action(&self, action: &CorpAction) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO corp_actions (action_id, symbol, action_type, ratio, record_date, ex_date, pay_date, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                action.action_id,
                action.symbol,
                action_type_str(action.action_type),
                action.ratio.to_string(),
                action.record_date.to_rfc3339(),
                action.ex_date.to_rfc3339(),
                action.pay_date.to_rfc3339(),
                action_status_str(action.status),
            ],
        )?;
        Ok(())
    }

    pub async fn get_action(&self, action_id: &str) -> CoreResult<Option<CorpAction>> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM corp_actions WHERE action_id = ?1", params![action_id], map_action_row)
            .optional()
            .map_err(CoreError::from)
    }

    pub async fn set_action_status(&self, action_id: &str, status: CorpActionStatus) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE corp_actions SET status = ?1 WHERE action_id = ?2",
            params![action_status_str(status), action_id],
        )?;
        Ok(())
    }

    pub async fn claim_pending_outbox(&self, batch_size: u32) -> CoreResult<Vec<crate::outbox::OutboxMessage>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM asset_vaults_outbox_messages WHERE status = 'pending' ORDER BY created_at LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![batch_size], map_outbox_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn mark_outbox_sent(&self, ids: &[String]) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        for id in ids {
            conn.execute(
                "UPDATE asset_vaults_outbox_messages SET status = 'sent', sent_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
        }
        Ok(())
    }

    pub async fn delete_sent_outbox_older_than(&self, cutoff: DateTime<Utc>) -> CoreResult<u64> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM asset_vaults_outbox_messages WHERE status = 'sent' AND sent_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted as u64)
    }
}

#[async_trait]
impl OutboxBackend for VaultStore {
    fn name(&self) -> &'static str {
        "vault"
    }
    async fn claim_pending(&self, batch_size: u32) -> CoreResult<Vec<crate::outbox::OutboxMessage>> {
        self.claim_pending_outbox(batch_size).await
    }
    async fn mark_sent(&self, ids: &[String]) -> CoreResult<()> {
        self.mark_outbox_sent(ids).await
    }
    async fn delete_sent_older_than(&self, cutoff: DateTime<Utc>) -> CoreResult<u64> {
        self.delete_sent_outbox_older_than(cutoff).await
    }
}

fn map_outbox_row(row: &rusqlite::Row) -> rusqlite::Result<crate::outbox::OutboxMessage> {
    let created_at: String = row.get("created_at")?;
    let sent_at: Option<String> = row.get("sent_at")?;
    let status: String = row.get("status")?;
    Ok(crate::outbox::OutboxMessage {
        id: row.get("id")?,
        event_id: row.get("event_id")?,
        event_type: row.get("event_type")?,
        payload: row.get("payload")?,
        status: if status == "sent" { crate::outbox::OutboxStatus::Sent } else { crate::outbox::OutboxStatus::Pending },
        created_at: created_at.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
        sent_at: sent_at.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
    })
}

fn map_vault_row(row: &rusqlite::Row) -> rusqlite::Result<AssetVault> {
    let updated_at: String = row.get("updated_at")?;
    Ok(AssetVault {
        vault_id: row.get("vault_id")?,
        vault_type: parse_type(&row.get::<_, String>("vault_type")?),
        user_id: row.get("user_id")?,
        symbol: row.get("symbol")?,
        balance: row.get("balance")?,
        locked: row.get("locked")?,
        updated_at: updated_at.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
    })
}

fn map_action_row(row: &rusqlite::Row) -> rusqlite::Result<CorpAction> {
    let ratio: String = row.get("ratio")?;
    let record_date: String = row.get("record_date")?;
    let ex_date: String = row.get("ex_date")?;
    let pay_date: String = row.get("pay_date")?;
    Ok(CorpAction {
        action_id: row.get("action_id")?,
        symbol: row.get("symbol")?,
        action_type: parse_action_type(&row.get::<_, String>("action_type")?),
        ratio: ratio.parse().unwrap_or_default(),
        record_date: record_date.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
        ex_date: ex_date.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
        pay_date: pay_date.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
        status: parse_action_status(&row.get::<_, String>("status")?),
    })
}

fn type_str(t: VaultType) -> &'static str {
    match t {
        VaultType::Customer => "CUSTOMER",
        VaultType::House => "HOUSE",
        VaultType::Omnibus => "OMNIBUS",
    }
}
fn parse_type(s: &str) -> VaultType {
    match s {
        "HOUSE" => VaultType::House,
        "OMNIBUS" => VaultType::Omnibus,
        _ => VaultType::Customer,
    }
}
fn action_type_str(t: CorpActionType) -> &'static str {
    match t {
        CorpActionType::Split => "SPLIT",
        CorpActionType::Dividend => "DIVIDEND",
        CorpActionType::Merger => "MERGER",
    }
}
fn parse_action_type(s: &str) -> CorpActionType {
    match s {
        "DIVIDEND" => CorpActionType::Dividend,
        "MERGER" => CorpActionType::Merger,
        _ => CorpActionType::Split,
    }
}
fn action_status_str(s: CorpActionStatus) -> &'static str {
    match s {
        CorpActionStatus::Announced => "ANNOUNCED",
        CorpActionStatus::Executed => "EXECUTED",
        CorpActionStatus::Cancelled => "CANCELLED",
    }
}
fn parse_action_status(s: &str) -> CorpActionStatus {
    match s {
        "EXECUTED" => CorpActionStatus::Executed,
        "CANCELLED" => CorpActionStatus::Cancelled,
        _ => CorpActionStatus::Announced,
    }
}
