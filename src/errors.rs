//! Domain error taxonomy.
//!
//! Every core module returns `Result<T, CoreError>`. The HTTP layer is the
//! only place that knows about status codes; domain code never imports axum.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, Serialize)]
#[serde(tag = "kind", content = "reason")]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("insufficient available balance: {0}")]
    InsufficientAvailable(String),

    #[error("insufficient frozen balance: {0}")]
    InsufficientFrozen(String),

    #[error("insufficient vault balance: {0}")]
    InsufficientVaultBalance(String),

    #[error("vault symbol mismatch: {0}")]
    VaultSymbolMismatch(String),

    #[error("vault type segregation violation: {0}")]
    VaultTypeSegregation(String),

    #[error("no liquidity available: {0}")]
    NoLiquidity(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("circuit open: {0}")]
    CircuitOpen(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn self_transfer(account_id: &str) -> Self {
        CoreError::InvalidArgument(format!("SELF_TRANSFER: cannot transfer {account_id} to itself"))
    }

    pub fn state_not_active(account_id: &str) -> Self {
        CoreError::PreconditionFailed(format!("STATE_NOT_ACTIVE: account {account_id} is not ACTIVE"))
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            CoreError::InsufficientAvailable(_)
            | CoreError::InsufficientFrozen(_)
            | CoreError::InsufficientVaultBalance(_)
            | CoreError::VaultSymbolMismatch(_)
            | CoreError::VaultTypeSegregation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::NoLiquidity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            CoreError::CircuitOpen(_) => StatusCode::LOCKED,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = axum::Json(serde_json::json!({
            "error": self.to_string(),
            "kind": kind_name(&self),
        }));
        (status, body).into_response()
    }
}

fn kind_name(e: &CoreError) -> &'static str {
    match e {
        CoreError::InvalidArgument(_) => "INVALID_ARGUMENT",
        CoreError::NotFound(_) => "NOT_FOUND",
        CoreError::PreconditionFailed(_) => "PRECONDITION_FAILED",
        CoreError::InsufficientAvailable(_) => "INSUFFICIENT_AVAILABLE",
        CoreError::InsufficientFrozen(_) => "INSUFFICIENT_FROZEN",
        CoreError::InsufficientVaultBalance(_) => "INSUFFICIENT_VAULT_BALANCE",
        CoreError::VaultSymbolMismatch(_) => "VAULT_SYMBOL_MISMATCH",
        CoreError::VaultTypeSegregation(_) => "VAULT_TYPE_SEGREGATION",
        CoreError::NoLiquidity(_) => "NO_LIQUIDITY",
        CoreError::RateLimited(_) => "RATE_LIMITED",
        CoreError::CircuitOpen(_) => "CIRCUIT_OPEN",
        CoreError::Conflict(_) => "CONFLICT",
        CoreError::Internal(_) => "INTERNAL",
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Internal(format!("sqlite: {e}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
