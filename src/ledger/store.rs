//! Persistence for the ledger aggregate. Balances are stored as `i64`
//! minor units (spec.md §3/§9: integer minor units inside the aggregate,
//! never mixed with decimal at this layer); rows are converted to/from
//! `Decimal` only at the `Account`/`Transaction` boundary.

use crate::errors::{CoreError, CoreResult};
use crate::ledger::model::{Account, AccountStatus, AccountType, Transaction, TransactionType};
use crate::money::from_minor_units;
use crate::outbox::OutboxBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerStore {
    pub fn open(path: &str) -> CoreResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CoreError::Internal(format!("open ledger db: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::Internal(format!("open ledger db: {e}")))?;
        Self::migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn migrate(conn: &Connection) -> CoreResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                account_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                account_type TEXT NOT NULL,
                currency TEXT NOT NULL,
                balance INTEGER NOT NULL,
                available INTEGER NOT NULL,
                frozen INTEGER NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(owner_id, account_type, currency)
            );
            CREATE TABLE IF NOT EXISTS transactions (
                transaction_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                transaction_type TEXT NOT NULL,
                amount INTEGER NOT NULL,
                balance_after INTEGER NOT NULL,
                reference_id TEXT NOT NULL,
                remark TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_account
                ON transactions(account_id, created_at DESC);
            CREATE TABLE IF NOT EXISTS idempotency_barrier (
                global_tx_id TEXT NOT NULL,
                branch_id TEXT NOT NULL,
                phase TEXT NOT NULL,
                result TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (global_tx_id, branch_id, phase)
            );
            CREATE TABLE IF NOT EXISTS accounts_outbox_messages (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                sent_at TEXT
            );",
        )
        .map_err(|e| CoreError::Internal(format!("migrate ledger db: {e}")))?;
        Ok(())
    }

    pub async fn create_account(
        &self,
        account_id: &str,
        owner_id: &str,
        account_type: AccountType,
        currency: &str,
    ) -> CoreResult<Account> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO accounts
                (account_id, owner_id, account_type, currency, balance, available, frozen, status, version, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, 0, 0, 'ACTIVE', 1, ?5)",
            params![account_id, owner_id, type_str(account_type), currency, now.to_rfc3339()],
        )?;
        if inserted == 0 {
            // Already exists for (owner_id, type, currency): lifecycle rule in spec.md §3.
            return row_to_account(&conn, |c| {
                c.query_row(
                    "SELECT * FROM accounts WHERE owner_id = ?1 AND account_type = ?2 AND currency = ?3",
                    params![owner_id, type_str(account_type), currency],
                    map_account_row,
                )
            });
        }
        self.get_account(account_id).await?.ok_or_else(|| CoreError::Internal("account vanished after insert".into()))
    }

    pub async fn get_account(&self, account_id: &str) -> CoreResult<Option<Account>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM accounts WHERE account_id = ?1",
            params![account_id],
            map_account_row,
        )
        .optional()
        .map_err(CoreError::from)
    }

    /// Optimistic-lock update: the caller holds the in-process row lock for
    /// the account, so this is a straightforward read-modify-write, but the
    /// `version` check still guards against a store-level surprise (e.g. a
    /// second process sharing the same file).
    pub async fn save_account(&self, account: &Account, expected_version: i64) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE accounts SET balance = ?1, available = ?2, frozen = ?3, status = ?4,
                version = ?5, updated_at = ?6
             WHERE account_id = ?7 AND version = ?8",
            params![
                crate::money::to_minor_units(account.balance),
                crate::money::to_minor_units(account.available),
                crate::money::to_minor_units(account.frozen),
                status_str(account.status),
                account.version,
                account.updated_at.to_rfc3339(),
                account.account_id,
                expected_version,
            ],
        )?;
        if updated == 0 {
            return Err(CoreError::Conflict(format!(
                "account {} version mismatch (expected {})",
                account.account_id, expected_version
            )));
        }
        Ok(())
    }

    pub async fn insert_transaction(&self, tx: &Transaction) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO transactions
                (transaction_id, account_id, transaction_type, amount, balance_after, reference_id, remark, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tx.transaction_id,
                tx.account_id,
                tx_type_str(tx.transaction_type),
                crate::money::to_minor_units(tx.amount),
                crate::money::to_minor_units(tx.balance_after),
                tx.reference_id,
                tx.remark,
                tx.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn insert_outbox(&self, event_id: &str, event_type: &str, payload: &str) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO accounts_outbox_messages (id, event_id, event_type, payload, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
            params![crate::idgen::new_id("obx"), event_id, event_type, payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn list_transactions(
        &self,
        account_id: &str,
        transaction_type: Option<TransactionType>,
        page: u32,
        page_size: u32,
    ) -> CoreResult<(Vec<Transaction>, u32)> {
        let conn = self.conn.lock().await;
        let page = page.max(1);
        let page_size = page_size.clamp(1, 500);
        let offset = (page - 1) * page_size;

        let total: u32 = match transaction_type {
            Some(t) => conn.query_row(
                "SELECT COUNT(*) FROM transactions WHERE account_id = ?1 AND transaction_type = ?2",
                params![account_id, tx_type_str(t)],
                |r| r.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM transactions WHERE account_id = ?1",
                params![account_id],
                |r| r.get(0),
            )?,
        };

        let mut stmt = match transaction_type {
            Some(_) => conn.prepare(
                "SELECT * FROM transactions WHERE account_id = ?1 AND transaction_type = ?2
                 ORDER BY created_at DESC LIMIT ?3 OFFSET ?4",
            )?,
            None => conn.prepare(
                "SELECT * FROM transactions WHERE account_id = ?1
                 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            )?,
        };

        let rows = if let Some(t) = transaction_type {
            stmt.query_map(params![account_id, tx_type_str(t), page_size, offset], map_transaction_row)?
                .collect::<Result<Vec<_>, _>>()?
        } else {
            stmt.query_map(params![account_id, page_size, offset], map_transaction_row)?
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok((rows, total))
    }

    /// Idempotency barrier for the TCC protocol: inserts the key if absent
    /// and returns `None`; if already present returns the stored result so
    /// the caller can short-circuit without re-applying effects.
    pub async fn check_or_record_idempotent(
        &self,
        global_tx_id: &str,
        branch_id: &str,
        phase: &str,
        result: &str,
    ) -> CoreResult<Option<String>> {
        let conn = self.conn.lock().await;
        let existing: Option<String> = conn
            .query_row(
                "SELECT result FROM idempotency_barrier WHERE global_tx_id = ?1 AND branch_id = ?2 AND phase = ?3",
                params![global_tx_id, branch_id, phase],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(prior) = existing {
            return Ok(Some(prior));
        }
        conn.execute(
            "INSERT INTO idempotency_barrier (global_tx_id, branch_id, phase, result, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![global_tx_id, branch_id, phase, result, Utc::now().to_rfc3339()],
        )?;
        Ok(None)
    }

    /// Read-only lookup of a previously recorded barrier result, without
    /// the insert-if-absent side effect of `check_or_record_idempotent`.
    pub async fn get_idempotent_result(
        &self,
        global_tx_id: &str,
        branch_id: &str,
        phase: &str,
    ) -> CoreResult<Option<String>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT result FROM idempotency_barrier WHERE global_tx_id = ?1 AND branch_id = ?2 AND phase = ?3",
            params![global_tx_id, branch_id, phase],
            |r| r.get(0),
        )
        .optional()
        .map_err(CoreError::from)
    }

    pub async fn has_phase(&self, global_tx_id: &str, branch_id: &str, phase: &str) -> CoreResult<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM idempotency_barrier WHERE global_tx_id = ?1 AND branch_id = ?2 AND phase = ?3",
            params![global_tx_id, branch_id, phase],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub async fn claim_pending_outbox(&self, batch_size: u32) -> CoreResult<Vec<crate::outbox::OutboxMessage>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM accounts_outbox_messages WHERE status = 'pending' ORDER BY created_at LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![batch_size], map_outbox_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn mark_outbox_sent(&self, ids: &[String]) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        for id in ids {
            conn.execute(
                "UPDATE accounts_outbox_messages SET status = 'sent', sent_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
        }
        Ok(())
    }

    pub async fn delete_sent_outbox_older_than(&self, cutoff: DateTime<Utc>) -> CoreResult<u64> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM accounts_outbox_messages WHERE status = 'sent' AND sent_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted as u64)
    }
}

#[async_trait]
impl OutboxBackend for LedgerStore {
    fn name(&self) -> &'static str {
        "ledger"
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

fn row_to_account(
    conn: &Connection,
    f: impl Fn(&Connection) -> rusqlite::Result<Account>,
) -> CoreResult<Account> {
    f(conn).map_err(CoreError::from)
}

fn map_account_row(row: &rusqlite::Row) -> rusqlite::Result<Account> {
    let balance: i64 = row.get("balance")?;
    let available: i64 = row.get("available")?;
    let frozen: i64 = row.get("frozen")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Account {
        account_id: row.get("account_id")?,
        owner_id: row.get("owner_id")?,
        account_type: parse_type(&row.get::<_, String>("account_type")?),
        currency: row.get("currency")?,
        balance: from_minor_units(balance),
        available: from_minor_units(available),
        frozen: from_minor_units(frozen),
        status: parse_status(&row.get::<_, String>("status")?),
        version: row.get("version")?,
        updated_at: updated_at.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
    })
}

fn map_transaction_row(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
    let amount: i64 = row.get("amount")?;
    let balance_after: i64 = row.get("balance_after")?;
    let created_at: String = row.get("created_at")?;
    Ok(Transaction {
        transaction_id: row.get("transaction_id")?,
        account_id: row.get("account_id")?,
        transaction_type: parse_tx_type(&row.get::<_, String>("transaction_type")?),
        amount: from_minor_units(amount),
        balance_after: from_minor_units(balance_after),
        reference_id: row.get("reference_id")?,
        remark: row.get("remark")?,
        created_at: created_at.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
    })
}

fn type_str(t: AccountType) -> &'static str {
    match t {
        AccountType::Spot => "SPOT",
        AccountType::Margin => "MARGIN",
        AccountType::House => "HOUSE",
        AccountType::Platform => "PLATFORM",
    }
}
fn parse_type(s: &str) -> AccountType {
    match s {
        "MARGIN" => AccountType::Margin,
        "HOUSE" => AccountType::House,
        "PLATFORM" => AccountType::Platform,
        _ => AccountType::Spot,
    }
}
fn status_str(s: AccountStatus) -> &'static str {
    match s {
        AccountStatus::Active => "ACTIVE",
        AccountStatus::Frozen => "FROZEN",
        AccountStatus::Closed => "CLOSED",
    }
}
fn parse_status(s: &str) -> AccountStatus {
    match s {
        "FROZEN" => AccountStatus::Frozen,
        "CLOSED" => AccountStatus::Closed,
        _ => AccountStatus::Active,
    }
}
fn tx_type_str(t: TransactionType) -> &'static str {
    match t {
        TransactionType::Deposit => "DEPOSIT",
        TransactionType::Withdraw => "WITHDRAW",
        TransactionType::TransferIn => "TRANSFER_IN",
        TransactionType::TransferOut => "TRANSFER_OUT",
        TransactionType::Freeze => "FREEZE",
        TransactionType::Unfreeze => "UNFREEZE",
        TransactionType::Deduct => "DEDUCT",
        TransactionType::Refund => "REFUND",
    }
}
fn parse_tx_type(s: &str) -> TransactionType {
    match s {
        "WITHDRAW" => TransactionType::Withdraw,
        "TRANSFER_IN" => TransactionType::TransferIn,
        "TRANSFER_OUT" => TransactionType::TransferOut,
        "FREEZE" => TransactionType::Freeze,
        "UNFREEZE" => TransactionType::Unfreeze,
        "DEDUCT" => TransactionType::Deduct,
        "REFUND" => TransactionType::Refund,
        _ => TransactionType::Deposit,
    }
}
