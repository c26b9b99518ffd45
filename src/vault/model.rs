//! Custody vault data model (spec.md §3 "AssetVault" / "CustodyTransfer").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VaultType {
    Customer,
    House,
    Omnibus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetVault {
    pub vault_id: String,
    pub vault_type: VaultType,
    pub user_id: Option<String>,
    pub symbol: String,
    pub balance: i64,
    pub locked: i64,
    pub updated_at: DateTime<Utc>,
}

impl AssetVault {
    pub fn available(&self) -> i64 {
        self.balance - self.locked
    }

    /// spec.md §3: `available := balance - locked >= 0`.
    pub fn invariant_holds(&self) -> bool {
        self.available() >= 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyTransfer {
    pub transfer_id: String,
    pub from_vault: String,
    pub to_vault: String,
    pub symbol: String,
    pub amount: i64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CorpActionType {
    Split,
    Dividend,
    Merger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CorpActionStatus {
    Announced,
    Executed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpAction {
    pub action_id: String,
    pub symbol: String,
    pub action_type: CorpActionType,
    pub ratio: rust_decimal::Decimal,
    pub record_date: DateTime<Utc>,
    pub ex_date: DateTime<Utc>,
    pub pay_date: DateTime<Utc>,
    pub status: CorpActionStatus,
}
