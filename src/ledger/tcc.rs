//! TCC (Try/Confirm/Cancel) distributed-transaction protocol for flows that
//! span outside this service's own local transaction boundary (spec.md
//! §4.1, §8 invariant 8, §9 open-question decision 1).
//!
//! Each phase is idempotent: a second invocation with the same
//! `(global_tx_id, branch_id, phase)` key returns the prior result without
//! re-applying effects. Cancel without a prior Try is a no-op
//! ("null compensation"); Cancel after Confirm is rejected.

use crate::errors::{CoreError, CoreResult};
use crate::ledger::account::Ledger;
use crate::ledger::model::AccountType;
use rust_decimal::Decimal;
use tracing::debug;

const PHASE_TRY: &str = "try";
const PHASE_CONFIRM: &str = "confirm";
const PHASE_CANCEL: &str = "cancel";

pub struct TccCoordinator<'a> {
    ledger: &'a Ledger,
}

impl<'a> TccCoordinator<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    async fn spot_account_id(&self, user_id: &str, currency: &str) -> CoreResult<String> {
        // Finds-or-creates the user's SPOT account for this currency; the
        // TCC barrier operates against the same account the spot balance
        // lives on.
        let account = self.ledger.create_account(user_id, AccountType::Spot, currency).await?;
        Ok(account.account_id)
    }

    pub async fn try_freeze(
        &self,
        global_tx_id: &str,
        branch_id: &str,
        user_id: &str,
        currency: &str,
        amount: Decimal,
    ) -> CoreResult<String> {
        if let Some(prior) = self.ledger.store().get_idempotent_result(global_tx_id, branch_id, PHASE_TRY).await? {
            debug!(global_tx_id, branch_id, "try_freeze already applied, replaying result");
            return Ok(prior);
        }
        let account_id = self.spot_account_id(user_id, currency).await?;
        let reference_id = format!("{global_tx_id}:{branch_id}");
        self.ledger.freeze(&account_id, amount, &reference_id, "tcc try").await?;
        // The barrier's stored result IS the account id: Confirm/Cancel
        // look it up by the same key to find what Try operated on.
        self.ledger
            .store()
            .check_or_record_idempotent(global_tx_id, branch_id, PHASE_TRY, &account_id)
            .await?;
        Ok(account_id)
    }

    pub async fn confirm_freeze(
        &self,
        global_tx_id: &str,
        branch_id: &str,
        amount: Decimal,
    ) -> CoreResult<()> {
        if let Some(_prior) = self
            .ledger
            .store()
            .check_or_record_idempotent(global_tx_id, branch_id, PHASE_CONFIRM, "done")
            .await?
        {
            return Ok(());
        }
        if !self.ledger.store().has_phase(global_tx_id, branch_id, PHASE_TRY).await? {
            // Null compensation: Confirm without a prior Try is a no-op.
            debug!(global_tx_id, branch_id, "confirm_freeze with no prior try, no-op");
            return Ok(());
        }
        let account_id = self.try_account_id(global_tx_id, branch_id).await?;
        let reference_id = format!("{global_tx_id}:{branch_id}");
        self.ledger.deduct(&account_id, amount, true, &reference_id, "tcc confirm").await?;
        Ok(())
    }

    pub async fn cancel_freeze(
        &self,
        global_tx_id: &str,
        branch_id: &str,
        amount: Decimal,
    ) -> CoreResult<()> {
        if self.ledger.store().has_phase(global_tx_id, branch_id, PHASE_CONFIRM).await? {
            return Err(CoreError::PreconditionFailed(format!(
                "cannot cancel {global_tx_id}:{branch_id}, already confirmed"
            )));
        }
        if let Some(_prior) =
            self.ledger.store().check_or_record_idempotent(global_tx_id, branch_id, PHASE_CANCEL, "done").await?
        {
            return Ok(());
        }
        if !self.ledger.store().has_phase(global_tx_id, branch_id, PHASE_TRY).await? {
            // Safe to call without a prior Try: null compensation.
            return Ok(());
        }
        let account_id = self.try_account_id(global_tx_id, branch_id).await?;
        let reference_id = format!("{global_tx_id}:{branch_id}:release");
        self.ledger.unfreeze(&account_id, amount, &reference_id, "tcc cancel").await?;
        Ok(())
    }

    async fn try_account_id(&self, global_tx_id: &str, branch_id: &str) -> CoreResult<String> {
        self.ledger
            .store()
            .get_idempotent_result(global_tx_id, branch_id, PHASE_TRY)
            .await?
            .ok_or_else(|| CoreError::Internal("missing try-phase account id".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::account::Ledger;
    use crate::ledger::store::LedgerStore;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    async fn setup() -> Ledger {
        Ledger::new(LedgerStore::open_in_memory().unwrap())
    }

    /// S8 — TCC invariants (spec.md §8 invariant 8).
    #[tokio::test]
    async fn try_freeze_then_retry_does_not_double_apply() {
        let ledger = setup().await;
        let account = ledger.create_account("user-b", AccountType::Spot, "USD").await.unwrap();
        ledger.deposit(&account.account_id, dec("100.00"), "seed", "t").await.unwrap();

        let tcc = TccCoordinator::new(&ledger);
        tcc.try_freeze("gtx-2", "b1", "user-b", "USD", dec("40.00")).await.unwrap();
        tcc.try_freeze("gtx-2", "b1", "user-b", "USD", dec("40.00")).await.unwrap();

        let state = ledger.get_balance(&account.account_id).await.unwrap();
        assert_eq!(state.frozen, dec("40.00")); // not frozen twice
    }

    #[tokio::test]
    async fn confirm_without_try_is_noop() {
        let ledger = setup().await;
        let tcc = TccCoordinator::new(&ledger);
        tcc.confirm_freeze("gtx-3", "b1", dec("5.00")).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_after_confirm_is_precondition_failed() {
        let ledger = setup().await;
        let account = ledger.create_account("user-c", AccountType::Spot, "USD").await.unwrap();
        ledger.deposit(&account.account_id, dec("100.00"), "seed", "t").await.unwrap();

        let tcc = TccCoordinator::new(&ledger);
        tcc.try_freeze("gtx-4", "b1", "user-c", "USD", dec("20.00")).await.unwrap();
        tcc.confirm_freeze("gtx-4", "b1", dec("20.00")).await.unwrap();

        let err = tcc.cancel_freeze("gtx-4", "b1", dec("20.00")).await.unwrap_err();
        assert!(matches!(err, CoreError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn cancel_without_try_is_noop() {
        let ledger = setup().await;
        let tcc = TccCoordinator::new(&ledger);
        tcc.cancel_freeze("gtx-5", "b1", dec("1.00")).await.unwrap();
    }
}
