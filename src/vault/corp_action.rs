//! Corporate action batch execution (spec.md §4.2, scenario S6).

use crate::errors::{CoreError, CoreResult};
use crate::vault::model::{CorpAction, CorpActionStatus, CorpActionType, VaultType};
use crate::vault::store::VaultStore;
use crate::vault::vault::VaultService;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;

pub struct CorpActionService<'a> {
    vaults: &'a VaultService,
    store: &'a VaultStore,
}

impl<'a> CorpActionService<'a> {
    pub fn new(vaults: &'a VaultService) -> Self {
        Self { vaults, store: vaults.store() }
    }

    pub async fn announce_action(
        &self,
        symbol: &str,
        action_type: CorpActionType,
        ratio: Decimal,
        record_date: DateTime<Utc>,
        ex_date: DateTime<Utc>,
        pay_date: DateTime<Utc>,
    ) -> CoreResult<CorpAction> {
        if ratio <= Decimal::ZERO {
            return Err(CoreError::InvalidArgument("ratio must be positive".into()));
        }
        let action = CorpAction {
            action_id: crate::idgen::new_id("corp"),
            symbol: symbol.to_string(),
            action_type,
            ratio,
            record_date,
            ex_date,
            pay_date,
            status: CorpActionStatus::Announced,
        };
        self.store.announce_action(&action).await?;
        Ok(action)
    }

    /// Executes a previously-announced action across every non-HOUSE vault
    /// holding the symbol. `new := floor(balance * ratio)`; the signed delta
    /// is applied via SafeCredit/SafeDebit. Individual vault failures are
    /// logged and do not abort the batch (spec.md §4.2).
    pub async fn execute_batch_action(&self, action_id: &str, now: DateTime<Utc>) -> CoreResult<u32> {
        let action = self
            .store
            .get_action(action_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("corp action {action_id}")))?;

        if action.status != CorpActionStatus::Announced {
            return Err(CoreError::PreconditionFailed(format!(
                "corp action {action_id} is {:?}, expected ANNOUNCED",
                action.status
            )));
        }
        if now < action.ex_date {
            return Err(CoreError::PreconditionFailed(format!(
                "corp action {action_id} ex_date has not passed"
            )));
        }

        let vaults = self.store.list_vaults_for_symbol(&action.symbol, VaultType::House).await?;
        let mut applied = 0u32;
        for vault in vaults {
            let new_balance = (Decimal::from(vault.balance) * action.ratio)
                .floor()
                .to_string()
                .parse::<i64>()
                .unwrap_or(vault.balance);
            let delta = new_balance - vault.balance;
            if delta == 0 {
                continue;
            }
            let result = if delta > 0 {
                self.vaults.safe_credit(&vault.vault_id, delta).await
            } else {
                self.vaults.safe_debit(&vault.vault_id, -delta).await
            };
            match result {
                Ok(()) => applied += 1,
                Err(e) => warn!(vault_id = %vault.vault_id, action_id, error = %e, "corp action: vault update failed, skipping"),
            }
        }

        self.store.set_action_status(action_id, CorpActionStatus::Executed).await?;
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::model::VaultType;
    use chrono::Duration;

    async fn setup() -> VaultService {
        VaultService::new(VaultStore::open_in_memory().unwrap())
    }

    /// S6 — 2-for-1 split: every CUSTOMER vault's balance doubles.
    #[tokio::test]
    async fn two_for_one_split_doubles_customer_vault_balances() {
        let vaults = setup().await;
        let v1 = vaults.find_or_create(VaultType::Customer, Some("user-1"), "ACME").await.unwrap();
        let v2 = vaults.find_or_create(VaultType::Customer, Some("user-2"), "ACME").await.unwrap();
        vaults.safe_credit(&v1.vault_id, 1000).await.unwrap();
        vaults.safe_credit(&v2.vault_id, 250).await.unwrap();

        let corp = CorpActionService::new(&vaults);
        let now = Utc::now();
        let action = corp
            .announce_action(
                "ACME",
                CorpActionType::Split,
                Decimal::from(2),
                now - Duration::days(5),
                now - Duration::days(1),
                now,
            )
            .await
            .unwrap();

        let applied = corp.execute_batch_action(&action.action_id, now).await.unwrap();
        assert_eq!(applied, 2);

        let v1_after = vaults.get_holding(&v1.vault_id).await.unwrap();
        let v2_after = vaults.get_holding(&v2.vault_id).await.unwrap();
        assert_eq!(v1_after.balance, 2000);
        assert_eq!(v2_after.balance, 500);

        let refreshed = vaults.store().get_action(&action.action_id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, CorpActionStatus::Executed);
    }

    #[tokio::test]
    async fn execute_before_ex_date_is_precondition_failed() {
        let vaults = setup().await;
        let corp = CorpActionService::new(&vaults);
        let now = Utc::now();
        let action = corp
            .announce_action("ACME", CorpActionType::Split, Decimal::from(2), now, now + Duration::days(5), now + Duration::days(10))
            .await
            .unwrap();

        let err = corp.execute_batch_action(&action.action_id, now).await.unwrap_err();
        assert!(matches!(err, CoreError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn execute_twice_is_precondition_failed() {
        let vaults = setup().await;
        let corp = CorpActionService::new(&vaults);
        let now = Utc::now();
        let action = corp
            .announce_action("ACME", CorpActionType::Split, Decimal::from(2), now, now, now)
            .await
            .unwrap();

        corp.execute_batch_action(&action.action_id, now).await.unwrap();
        let err = corp.execute_batch_action(&action.action_id, now).await.unwrap_err();
        assert!(matches!(err, CoreError::PreconditionFailed(_)));
    }
}
