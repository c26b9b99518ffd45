//! Treasury ledger: the money-truth (spec.md §4.1).

pub mod account;
pub mod model;
pub mod store;
pub mod tcc;

pub use account::Ledger;
pub use model::{Account, AccountStatus, AccountType, Transaction, TransactionType};
pub use store::LedgerStore;
pub use tcc::TccCoordinator;
