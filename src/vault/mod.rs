//! Custody vault: segregated asset holding (spec.md §4.2).

pub mod corp_action;
pub mod model;
pub mod store;
pub mod vault;

pub use corp_action::CorpActionService;
pub use model::{AssetVault, CorpAction, CorpActionStatus, CorpActionType, CustodyTransfer, VaultType};
pub use store::VaultStore;
pub use vault::VaultService;
