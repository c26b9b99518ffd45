//! Treasury ledger data model (spec.md §3 "Account" / "Transaction").

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Spot,
    Margin,
    House,
    Platform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    Active,
    Frozen,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    TransferIn,
    TransferOut,
    Freeze,
    Unfreeze,
    Deduct,
    Refund,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub owner_id: String,
    pub account_type: AccountType,
    pub currency: String,
    pub balance: Decimal,
    pub available: Decimal,
    pub frozen: Decimal,
    pub status: AccountStatus,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Checks the core invariant from spec.md §8.1: `balance = available +
    /// frozen` with `available, frozen >= 0`.
    pub fn invariant_holds(&self) -> bool {
        self.balance == self.available + self.frozen
            && self.available >= Decimal::ZERO
            && self.frozen >= Decimal::ZERO
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub account_id: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub reference_id: String,
    pub remark: String,
    pub created_at: DateTime<Utc>,
}
