//! Ledger aggregate operations (spec.md §4.1).
//!
//! Every mutating operation: acquires the per-account row lock, loads the
//! account, checks preconditions, applies the balance change, appends a
//! `Transaction`, bumps `version`, and writes an outbox row — all before
//! releasing the lock, so the sequence is observed atomically by any other
//! caller serialized behind the same lock.

use crate::concurrency::LockManager;
use crate::errors::{CoreError, CoreResult};
use crate::ledger::model::{Account, AccountStatus, AccountType, Transaction, TransactionType};
use crate::ledger::store::LedgerStore;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, warn};

pub struct Ledger {
    store: LedgerStore,
    locks: LockManager<String>,
}

impl Ledger {
    pub fn new(store: LedgerStore) -> Self {
        Self { store, locks: LockManager::new() }
    }

    pub async fn create_account(
        &self,
        owner_id: &str,
        account_type: AccountType,
        currency: &str,
    ) -> CoreResult<Account> {
        if owner_id.is_empty() || currency.is_empty() {
            return Err(CoreError::InvalidArgument("owner_id and currency are required".into()));
        }
        let account_id = crate::idgen::new_id("acct");
        self.store.create_account(&account_id, owner_id, account_type, currency).await
    }

    pub async fn get_balance(&self, account_id: &str) -> CoreResult<Account> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("account {account_id}")))
    }

    pub async fn list_transactions(
        &self,
        account_id: &str,
        transaction_type: Option<TransactionType>,
        page: u32,
        page_size: u32,
    ) -> CoreResult<(Vec<Transaction>, u32)> {
        self.store.list_transactions(account_id, transaction_type, page, page_size).await
    }

    /// Idempotency check shared by Deposit/Freeze/Unfreeze/Deduct: a prior
    /// transaction of the same type with the same `reference_id` on this
    /// account means the operation already applied.
    async fn find_prior(
        &self,
        account_id: &str,
        transaction_type: TransactionType,
        reference_id: &str,
    ) -> CoreResult<Option<Transaction>> {
        let (rows, _) = self.store.list_transactions(account_id, Some(transaction_type), 1, 500).await?;
        Ok(rows.into_iter().find(|t| t.reference_id == reference_id))
    }

    pub async fn deposit(
        &self,
        account_id: &str,
        amount: Decimal,
        reference_id: &str,
        source: &str,
    ) -> CoreResult<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::InvalidArgument("amount must be positive".into()));
        }
        if let Some(prior) = self.find_prior(account_id, TransactionType::Deposit, reference_id).await? {
            debug!(account_id, reference_id, "deposit already applied, returning prior result");
            return Ok(prior);
        }

        let _guard = self.locks.acquire(&account_id.to_string()).await;
        let mut account = self.get_balance(account_id).await?;
        require_active(&account)?;

        let expected_version = account.version;
        account.balance += amount;
        account.available += amount;
        account.version += 1;
        account.updated_at = Utc::now();
        self.store.save_account(&account, expected_version).await?;

        let tx = self
            .record_transaction(account_id, TransactionType::Deposit, amount, account.balance, reference_id, source)
            .await?;
        self.emit_event(account_id, "FundsDeposited", &tx).await;
        Ok(tx)
    }

    pub async fn freeze(
        &self,
        account_id: &str,
        amount: Decimal,
        reference_id: &str,
        reason: &str,
    ) -> CoreResult<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::InvalidArgument("amount must be positive".into()));
        }
        if let Some(prior) = self.find_prior(account_id, TransactionType::Freeze, reference_id).await? {
            return Ok(prior);
        }

        let _guard = self.locks.acquire(&account_id.to_string()).await;
        let mut account = self.get_balance(account_id).await?;
        require_active(&account)?;
        if account.available < amount {
            return Err(CoreError::InsufficientAvailable(format!(
                "account {account_id} has {} available, needs {amount}",
                account.available
            )));
        }

        let expected_version = account.version;
        account.available -= amount;
        account.frozen += amount;
        account.version += 1;
        account.updated_at = Utc::now();
        self.store.save_account(&account, expected_version).await?;

        let tx = self
            .record_transaction(account_id, TransactionType::Freeze, amount, account.frozen, reference_id, reason)
            .await?;
        self.emit_event(account_id, "FundsFrozen", &tx).await;
        Ok(tx)
    }

    pub async fn unfreeze(
        &self,
        account_id: &str,
        amount: Decimal,
        reference_id: &str,
        reason: &str,
    ) -> CoreResult<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::InvalidArgument("amount must be positive".into()));
        }
        if let Some(prior) = self.find_prior(account_id, TransactionType::Unfreeze, reference_id).await? {
            return Ok(prior);
        }

        let _guard = self.locks.acquire(&account_id.to_string()).await;
        let mut account = self.get_balance(account_id).await?;
        require_active(&account)?;
        if account.frozen < amount {
            return Err(CoreError::InsufficientFrozen(format!(
                "account {account_id} has {} frozen, needs {amount}",
                account.frozen
            )));
        }

        let expected_version = account.version;
        account.frozen -= amount;
        account.available += amount;
        account.version += 1;
        account.updated_at = Utc::now();
        self.store.save_account(&account, expected_version).await?;

        let tx = self
            .record_transaction(account_id, TransactionType::Unfreeze, amount, account.available, reference_id, reason)
            .await?;
        self.emit_event(account_id, "FundsUnfrozen", &tx).await;
        Ok(tx)
    }

    pub async fn deduct(
        &self,
        account_id: &str,
        amount: Decimal,
        from_frozen: bool,
        reference_id: &str,
        reason: &str,
    ) -> CoreResult<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::InvalidArgument("amount must be positive".into()));
        }
        if let Some(prior) = self.find_prior(account_id, TransactionType::Deduct, reference_id).await? {
            return Ok(prior);
        }

        let _guard = self.locks.acquire(&account_id.to_string()).await;
        let mut account = self.get_balance(account_id).await?;
        require_active(&account)?;

        if from_frozen {
            if account.frozen < amount {
                return Err(CoreError::InsufficientFrozen(format!(
                    "account {account_id} has {} frozen, needs {amount}",
                    account.frozen
                )));
            }
            account.frozen -= amount;
        } else {
            if account.available < amount {
                return Err(CoreError::InsufficientAvailable(format!(
                    "account {account_id} has {} available, needs {amount}",
                    account.available
                )));
            }
            account.available -= amount;
        }
        let expected_version = account.version;
        account.balance -= amount;
        account.version += 1;
        account.updated_at = Utc::now();
        self.store.save_account(&account, expected_version).await?;

        let tx = self
            .record_transaction(account_id, TransactionType::Deduct, amount, account.balance, reference_id, reason)
            .await?;
        self.emit_event(account_id, "FundsDeducted", &tx).await;
        Ok(tx)
    }

    /// Transfer between two accounts as one local transaction, serialized
    /// by a deterministic ascending-id lock order (spec.md §4.1 / §5).
    pub async fn transfer(
        &self,
        from_id: &str,
        to_id: &str,
        amount: Decimal,
        reference_id: &str,
        remark: &str,
    ) -> CoreResult<(Transaction, Transaction)> {
        if from_id == to_id {
            return Err(CoreError::self_transfer(from_id));
        }
        if amount <= Decimal::ZERO {
            return Err(CoreError::InvalidArgument("amount must be positive".into()));
        }

        let from_key = from_id.to_string();
        let to_key = to_id.to_string();
        let (_g1, _g2) = self.locks.acquire_pair(&from_key, &to_key).await;

        let mut from = self.get_balance(from_id).await?;
        let mut to = self.get_balance(to_id).await?;
        require_active(&from)?;
        require_active(&to)?;
        if from.available < amount {
            return Err(CoreError::InsufficientAvailable(format!(
                "account {from_id} has {} available, needs {amount}",
                from.available
            )));
        }

        let from_version = from.version;
        from.balance -= amount;
        from.available -= amount;
        from.version += 1;
        from.updated_at = Utc::now();

        let to_version = to.version;
        to.balance += amount;
        to.available += amount;
        to.version += 1;
        to.updated_at = Utc::now();

        self.store.save_account(&from, from_version).await?;
        self.store.save_account(&to, to_version).await?;

        let out_tx = self
            .record_transaction(from_id, TransactionType::TransferOut, amount, from.balance, reference_id, remark)
            .await?;
        let in_tx = self
            .record_transaction(to_id, TransactionType::TransferIn, amount, to.balance, reference_id, remark)
            .await?;
        self.emit_event(from_id, "FundsTransferredOut", &out_tx).await;
        self.emit_event(to_id, "FundsTransferredIn", &in_tx).await;
        Ok((out_tx, in_tx))
    }

    pub(crate) async fn record_transaction(
        &self,
        account_id: &str,
        transaction_type: TransactionType,
        amount: Decimal,
        balance_after: Decimal,
        reference_id: &str,
        remark: &str,
    ) -> CoreResult<Transaction> {
        let tx = Transaction {
            transaction_id: crate::idgen::new_id("tx"),
            account_id: account_id.to_string(),
            transaction_type,
            amount,
            balance_after,
            reference_id: reference_id.to_string(),
            remark: remark.to_string(),
            created_at: Utc::now(),
        };
        self.store.insert_transaction(&tx).await?;
        Ok(tx)
    }

    async fn emit_event(&self, account_id: &str, event_type: &str, tx: &Transaction) {
        let payload = serde_json::to_string(tx).unwrap_or_default();
        if let Err(e) = self.store.insert_outbox(&tx.transaction_id, event_type, &payload).await {
            warn!(account_id, event_type, error = %e, "failed to write outbox row");
        }
    }

    pub(crate) fn store(&self) -> &LedgerStore {
        &self.store
    }
}

fn require_active(account: &Account) -> CoreResult<()> {
    if account.status != AccountStatus::Active {
        return Err(CoreError::state_not_active(&account.account_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::LedgerStore;

    async fn new_ledger() -> Ledger {
        Ledger::new(LedgerStore::open_in_memory().unwrap())
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    /// S1 — Freeze/Deduct on spot buy (spec.md §8).
    #[tokio::test]
    async fn s1_freeze_then_deduct_on_spot_buy() {
        let ledger = new_ledger().await;
        let account = ledger.create_account("user-1", AccountType::Spot, "USD").await.unwrap();

        ledger.deposit(&account.account_id, dec("1000.00"), "dep-1", "test").await.unwrap();
        ledger.freeze(&account.account_id, dec("300.00"), "ord-1", "order hold").await.unwrap();
        ledger.deduct(&account.account_id, dec("300.00"), true, "ord-1", "order fill").await.unwrap();

        let final_state = ledger.get_balance(&account.account_id).await.unwrap();
        assert_eq!(final_state.balance, dec("700.00"));
        assert_eq!(final_state.available, dec("700.00"));
        assert_eq!(final_state.frozen, dec("0.00"));
        assert!(final_state.invariant_holds());

        let (rows, total) = ledger.list_transactions(&account.account_id, None, 1, 10).await.unwrap();
        assert_eq!(total, 3);
        let mut by_type: Vec<_> = rows.iter().map(|t| (t.transaction_type, t.balance_after)).collect();
        by_type.sort_by_key(|(_, b)| *b);
        assert!(rows.iter().any(|t| t.transaction_type == TransactionType::Deposit && t.balance_after == dec("1000.00")));
        assert!(rows.iter().any(|t| t.transaction_type == TransactionType::Freeze && t.balance_after == dec("300.00")));
        assert!(rows.iter().any(|t| t.transaction_type == TransactionType::Deduct && t.balance_after == dec("700.00")));
    }

    #[tokio::test]
    async fn freeze_fails_with_insufficient_available() {
        let ledger = new_ledger().await;
        let account = ledger.create_account("user-2", AccountType::Spot, "USD").await.unwrap();
        ledger.deposit(&account.account_id, dec("100.00"), "d1", "t").await.unwrap();
        let err = ledger.freeze(&account.account_id, dec("200.00"), "ord", "hold").await.unwrap_err();
        assert!(matches!(err, CoreError::InsufficientAvailable(_)));
    }

    #[tokio::test]
    async fn freeze_then_unfreeze_restores_exact_state() {
        let ledger = new_ledger().await;
        let account = ledger.create_account("user-3", AccountType::Spot, "USD").await.unwrap();
        ledger.deposit(&account.account_id, dec("500.00"), "d1", "t").await.unwrap();
        ledger.freeze(&account.account_id, dec("120.00"), "ord-a", "hold").await.unwrap();
        ledger.unfreeze(&account.account_id, dec("120.00"), "ord-a-release", "release").await.unwrap();

        let state = ledger.get_balance(&account.account_id).await.unwrap();
        assert_eq!(state.available, dec("500.00"));
        assert_eq!(state.frozen, dec("0.00"));
    }

    #[tokio::test]
    async fn deposit_is_idempotent_on_reference_id() {
        let ledger = new_ledger().await;
        let account = ledger.create_account("user-4", AccountType::Spot, "USD").await.unwrap();
        let first = ledger.deposit(&account.account_id, dec("50.00"), "ref-x", "t").await.unwrap();
        let second = ledger.deposit(&account.account_id, dec("50.00"), "ref-x", "t").await.unwrap();
        assert_eq!(first.transaction_id, second.transaction_id);

        let state = ledger.get_balance(&account.account_id).await.unwrap();
        assert_eq!(state.balance, dec("50.00")); // not double-applied
    }

    #[tokio::test]
    async fn transfer_rejects_self_transfer() {
        let ledger = new_ledger().await;
        let account = ledger.create_account("user-5", AccountType::Spot, "USD").await.unwrap();
        let err = ledger
            .transfer(&account.account_id, &account.account_id, dec("1.00"), "r", "m")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    /// S2 — Transfer deadlock-free (spec.md §8), concurrent opposite-order transfers.
    #[tokio::test]
    async fn s2_concurrent_transfers_are_deadlock_free_and_conserve_total() {
        use std::sync::Arc;
        let ledger = Arc::new(new_ledger().await);
        let a = ledger.create_account("owner-a", AccountType::Spot, "USD").await.unwrap();
        let b = ledger.create_account("owner-b", AccountType::Spot, "USD").await.unwrap();
        ledger.deposit(&a.account_id, dec("500.00"), "seed-a", "t").await.unwrap();

        let l1 = ledger.clone();
        let (a1, b1) = (a.account_id.clone(), b.account_id.clone());
        let t1 = tokio::spawn(async move { l1.transfer(&a1, &b1, dec("100.00"), "xfer-1", "m").await });

        let l2 = ledger.clone();
        let (a2, b2) = (a.account_id.clone(), b.account_id.clone());
        let t2 = tokio::spawn(async move { l2.transfer(&b2, &a2, dec("50.00"), "xfer-2", "m").await });

        let (r1, r2) = tokio::time::timeout(std::time::Duration::from_secs(5), async { (t1.await, t2.await) })
            .await
            .expect("transfers must not deadlock");
        r1.unwrap().unwrap();
        r2.unwrap().unwrap();

        let final_a = ledger.get_balance(&a.account_id).await.unwrap();
        let final_b = ledger.get_balance(&b.account_id).await.unwrap();
        assert_eq!(final_a.balance + final_b.balance, dec("500.00"));
        assert!(final_a.balance == dec("450.00") || final_a.balance == dec("550.00"));
    }

    #[tokio::test]
    async fn concurrent_deposits_have_no_lost_updates() {
        use std::sync::Arc;
        let ledger = Arc::new(new_ledger().await);
        let account = ledger.create_account("owner-c", AccountType::Spot, "USD").await.unwrap();
        let mut handles = Vec::new();
        for i in 0..20 {
            let l = ledger.clone();
            let id = account.account_id.clone();
            handles.push(tokio::spawn(async move {
                l.deposit(&id, dec("10.00"), &format!("dep-{i}"), "t").await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let state = ledger.get_balance(&account.account_id).await.unwrap();
        assert_eq!(state.balance, dec("200.00"));
    }
}
