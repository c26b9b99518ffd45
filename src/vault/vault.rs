//! Vault aggregate operations (spec.md §4.2).

use crate::concurrency::LockManager;
use crate::errors::{CoreError, CoreResult};
use crate::vault::model::{AssetVault, CustodyTransfer, VaultType};
use crate::vault::store::VaultStore;
use chrono::Utc;
use tracing::{info, warn};

pub struct VaultService {
    store: VaultStore,
    locks: LockManager<String>,
}

/// spec.md §3: CUSTOMER vaults and HOUSE vaults must never be touched by the
/// same transfer. HOUSE→CUSTOMER (funding/withdrawal) and OMNIBUS→CUSTOMER
/// (segregation) are the two sanctioned cross-type paths; everything else
/// must stay within one vault type.
fn segregation_allows(from: VaultType, to: VaultType) -> bool {
    use VaultType::*;
    from == to || matches!((from, to), (House, Customer) | (Omnibus, Customer))
}

impl VaultService {
    pub fn new(store: VaultStore) -> Self {
        Self { store, locks: LockManager::new() }
    }

    pub async fn get_holding(&self, vault_id: &str) -> CoreResult<AssetVault> {
        self.store.get_vault(vault_id).await?.ok_or_else(|| CoreError::NotFound(format!("vault {vault_id}")))
    }

    pub async fn find_or_create(&self, vault_type: VaultType, user_id: Option<&str>, symbol: &str) -> CoreResult<AssetVault> {
        if vault_type != VaultType::Customer && user_id.is_some() {
            return Err(CoreError::InvalidArgument("user_id must be empty for non-CUSTOMER vaults".into()));
        }
        self.store.find_or_create_vault(vault_type, user_id, symbol).await
    }

    pub async fn safe_debit(&self, vault_id: &str, amount: i64) -> CoreResult<()> {
        if amount <= 0 {
            return Err(CoreError::InvalidArgument("amount must be positive".into()));
        }
        let _guard = self.locks.acquire(&vault_id.to_string()).await;
        let mut vault = self.get_holding(vault_id).await?;
        if vault.available() < amount {
            return Err(CoreError::InsufficientVaultBalance(format!(
                "vault {vault_id} has {} available, needs {amount}",
                vault.available()
            )));
        }
        vault.balance -= amount;
        vault.updated_at = Utc::now();
        self.store.save_vault(&vault).await
    }

    pub async fn safe_credit(&self, vault_id: &str, amount: i64) -> CoreResult<()> {
        if amount <= 0 {
            return Err(CoreError::InvalidArgument("amount must be positive".into()));
        }
        let _guard = self.locks.acquire(&vault_id.to_string()).await;
        let mut vault = self.get_holding(vault_id).await?;
        vault.balance += amount;
        vault.updated_at = Utc::now();
        self.store.save_vault(&vault).await
    }

    pub async fn lock(&self, vault_id: &str, amount: i64) -> CoreResult<()> {
        if amount <= 0 {
            return Err(CoreError::InvalidArgument("amount must be positive".into()));
        }
        let _guard = self.locks.acquire(&vault_id.to_string()).await;
        let mut vault = self.get_holding(vault_id).await?;
        if vault.available() < amount {
            return Err(CoreError::InsufficientVaultBalance(format!(
                "vault {vault_id} has {} available, needs {amount}",
                vault.available()
            )));
        }
        vault.locked += amount;
        vault.updated_at = Utc::now();
        self.store.save_vault(&vault).await
    }

    /// Clamps to `locked`, never underflows (spec.md §4.2).
    pub async fn unlock(&self, vault_id: &str, amount: i64) -> CoreResult<()> {
        if amount <= 0 {
            return Err(CoreError::InvalidArgument("amount must be positive".into()));
        }
        let _guard = self.locks.acquire(&vault_id.to_string()).await;
        let mut vault = self.get_holding(vault_id).await?;
        vault.locked = (vault.locked - amount).max(0);
        vault.updated_at = Utc::now();
        self.store.save_vault(&vault).await
    }

    /// Internal transfer between two vaults: atomically debits the source,
    /// credits the destination, records a `CustodyTransfer`.
    pub async fn transfer_internal(
        &self,
        from_vault_id: &str,
        to_vault_id: &str,
        symbol: &str,
        amount: i64,
        reason: &str,
    ) -> CoreResult<CustodyTransfer> {
        if amount <= 0 {
            return Err(CoreError::InvalidArgument("amount must be positive".into()));
        }
        let from_key = from_vault_id.to_string();
        let to_key = to_vault_id.to_string();
        let (_g1, _g2) = self.locks.acquire_pair(&from_key, &to_key).await;

        let mut from = self.get_holding(from_vault_id).await?;
        let mut to = self.get_holding(to_vault_id).await?;
        if from.symbol != symbol || to.symbol != symbol {
            return Err(CoreError::VaultSymbolMismatch(format!(
                "vaults {from_vault_id}/{to_vault_id} do not both hold {symbol}"
            )));
        }
        if !segregation_allows(from.vault_type, to.vault_type) {
            return Err(CoreError::VaultTypeSegregation(format!(
                "transfer from {:?} vault {from_vault_id} to {:?} vault {to_vault_id} is not permitted",
                from.vault_type, to.vault_type
            )));
        }
        if from.available() < amount {
            return Err(CoreError::InsufficientVaultBalance(format!(
                "vault {from_vault_id} has {} available, needs {amount}",
                from.available()
            )));
        }

        from.balance -= amount;
        from.updated_at = Utc::now();
        to.balance += amount;
        to.updated_at = Utc::now();
        self.store.save_vault(&from).await?;
        self.store.save_vault(&to).await?;

        let transfer = CustodyTransfer {
            transfer_id: crate::idgen::new_id("xfer"),
            from_vault: from_vault_id.to_string(),
            to_vault: to_vault_id.to_string(),
            symbol: symbol.to_string(),
            amount,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        };
        self.store.insert_transfer(&transfer).await?;
        let payload = serde_json::to_string(&transfer).unwrap_or_default();
        if let Err(e) = self.store.insert_outbox(&transfer.transfer_id, "CustodyTransferred", &payload).await {
            warn!(error = %e, "failed to write vault outbox row");
        }
        Ok(transfer)
    }

    /// Iterates OMNIBUS vaults; for each with positive available, debits
    /// the full amount and credits the user's CUSTOMER vault for the same
    /// symbol. Per-vault failures are logged and skipped (spec.md §4.2).
    pub async fn segregate_all_user_assets(&self, user_id: &str) -> CoreResult<u32> {
        let omnibus_vaults = self.store.list_omnibus_vaults_for_user_assets().await?;
        let mut succeeded = 0u32;
        for vault in omnibus_vaults {
            let available = vault.available();
            if available <= 0 {
                continue;
            }
            let customer_vault = match self.find_or_create(VaultType::Customer, Some(user_id), &vault.symbol).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(vault_id = %vault.vault_id, error = %e, "segregate: could not resolve customer vault, skipping");
                    continue;
                }
            };
            match self
                .transfer_internal(&vault.vault_id, &customer_vault.vault_id, &vault.symbol, available, "segregation")
                .await
            {
                Ok(_) => succeeded += 1,
                Err(e) => warn!(vault_id = %vault.vault_id, error = %e, "segregate: transfer failed, skipping"),
            }
        }
        info!(user_id, succeeded, "segregate_all_user_assets complete");
        Ok(succeeded)
    }

    pub(crate) fn store(&self) -> &VaultStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> VaultService {
        VaultService::new(VaultStore::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn safe_debit_fails_on_insufficient_balance() {
        let svc = setup().await;
        let v = svc.find_or_create(VaultType::House, None, "BTC").await.unwrap();
        let err = svc.safe_debit(&v.vault_id, 100).await.unwrap_err();
        assert!(matches!(err, CoreError::InsufficientVaultBalance(_)));
    }

    #[tokio::test]
    async fn lock_then_unlock_clamps_to_zero() {
        let svc = setup().await;
        let v = svc.find_or_create(VaultType::House, None, "BTC").await.unwrap();
        svc.safe_credit(&v.vault_id, 100).await.unwrap();
        svc.lock(&v.vault_id, 40).await.unwrap();
        svc.unlock(&v.vault_id, 1000).await.unwrap(); // clamps, never underflows
        let holding = svc.get_holding(&v.vault_id).await.unwrap();
        assert_eq!(holding.locked, 0);
        assert!(holding.invariant_holds());
    }

    #[tokio::test]
    async fn transfer_internal_rejects_symbol_mismatch() {
        let svc = setup().await;
        let from = svc.find_or_create(VaultType::House, None, "BTC").await.unwrap();
        let to = svc.find_or_create(VaultType::House, None, "ETH").await.unwrap();
        svc.safe_credit(&from.vault_id, 100).await.unwrap();
        let err = svc.transfer_internal(&from.vault_id, &to.vault_id, "BTC", 10, "r").await.unwrap_err();
        assert!(matches!(err, CoreError::VaultSymbolMismatch(_)));
    }

    #[tokio::test]
    async fn transfer_internal_rejects_customer_to_house() {
        let svc = setup().await;
        let from = svc.find_or_create(VaultType::Customer, Some("user-1"), "BTC").await.unwrap();
        let to = svc.find_or_create(VaultType::House, None, "BTC").await.unwrap();
        svc.safe_credit(&from.vault_id, 100).await.unwrap();
        let err = svc.transfer_internal(&from.vault_id, &to.vault_id, "BTC", 10, "r").await.unwrap_err();
        assert!(matches!(err, CoreError::VaultTypeSegregation(_)));
    }

    #[tokio::test]
    async fn transfer_internal_allows_house_to_customer_seeding() {
        let svc = setup().await;
        let from = svc.find_or_create(VaultType::House, None, "BTC").await.unwrap();
        let to = svc.find_or_create(VaultType::Customer, Some("user-1"), "BTC").await.unwrap();
        svc.safe_credit(&from.vault_id, 100).await.unwrap();
        svc.transfer_internal(&from.vault_id, &to.vault_id, "BTC", 10, "seed").await.unwrap();
        let to_after = svc.get_holding(&to.vault_id).await.unwrap();
        assert_eq!(to_after.balance, 10);
    }

    #[tokio::test]
    async fn transfer_internal_conserves_total() {
        let svc = setup().await;
        let from = svc.find_or_create(VaultType::House, None, "BTC").await.unwrap();
        let to = svc.find_or_create(VaultType::Customer, Some("user-1"), "BTC").await.unwrap();
        svc.safe_credit(&from.vault_id, 500).await.unwrap();
        svc.transfer_internal(&from.vault_id, &to.vault_id, "BTC", 200, "withdrawal").await.unwrap();

        let from_after = svc.get_holding(&from.vault_id).await.unwrap();
        let to_after = svc.get_holding(&to.vault_id).await.unwrap();
        assert_eq!(from_after.balance, 300);
        assert_eq!(to_after.balance, 200);
    }

    #[tokio::test]
    async fn segregate_moves_positive_omnibus_balances_to_customer_vaults() {
        let svc = setup().await;
        let omnibus = svc.find_or_create(VaultType::Omnibus, None, "BTC").await.unwrap();
        svc.safe_credit(&omnibus.vault_id, 150).await.unwrap();

        let succeeded = svc.segregate_all_user_assets("user-9").await.unwrap();
        assert_eq!(succeeded, 1);

        let customer = svc.find_or_create(VaultType::Customer, Some("user-9"), "BTC").await.unwrap();
        assert_eq!(customer.balance, 150);
        let omnibus_after = svc.get_holding(&omnibus.vault_id).await.unwrap();
        assert_eq!(omnibus_after.balance, 0);
    }
}
