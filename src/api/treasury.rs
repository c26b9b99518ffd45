//! Treasury HTTP surface (spec.md §6 "Treasury service").

use crate::errors::CoreResult;
use crate::ledger::{Account, AccountType, Ledger, Transaction, TransactionType};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router(ledger: Arc<Ledger>) -> Router {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/accounts/:account_id", get(get_balance))
        .route("/accounts/:account_id/transactions", get(list_transactions))
        .route("/accounts/:account_id/deposit", post(deposit))
        .route("/accounts/:account_id/freeze", post(freeze))
        .route("/accounts/:account_id/unfreeze", post(unfreeze))
        .route("/accounts/:account_id/deduct", post(deduct))
        .route("/transfer", post(transfer))
        .route("/tcc/try-freeze", post(tcc_try_freeze))
        .route("/tcc/confirm-freeze", post(tcc_confirm_freeze))
        .route("/tcc/cancel-freeze", post(tcc_cancel_freeze))
        .with_state(ledger)
}

#[derive(Deserialize)]
struct CreateAccountRequest {
    owner_id: String,
    account_type: AccountType,
    currency: String,
}

async fn create_account(State(ledger): State<Arc<Ledger>>, Json(req): Json<CreateAccountRequest>) -> CoreResult<Json<Account>> {
    let account = ledger.create_account(&req.owner_id, req.account_type, &req.currency).await?;
    Ok(Json(account))
}

async fn get_balance(State(ledger): State<Arc<Ledger>>, Path(account_id): Path<String>) -> CoreResult<Json<Account>> {
    Ok(Json(ledger.get_balance(&account_id).await?))
}

#[derive(Deserialize)]
struct ListTransactionsQuery {
    #[serde(rename = "type")]
    transaction_type: Option<TransactionType>,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
}
fn default_page() -> u32 {
    1
}
fn default_page_size() -> u32 {
    50
}

#[derive(Serialize)]
struct ListTransactionsResponse {
    rows: Vec<Transaction>,
    total: u32,
}

async fn list_transactions(
    State(ledger): State<Arc<Ledger>>,
    Path(account_id): Path<String>,
    Query(q): Query<ListTransactionsQuery>,
) -> CoreResult<Json<ListTransactionsResponse>> {
    let (rows, total) = ledger.list_transactions(&account_id, q.transaction_type, q.page, q.page_size).await?;
    Ok(Json(ListTransactionsResponse { rows, total }))
}

#[derive(Deserialize)]
struct AmountRequest {
    amount: Decimal,
    #[serde(rename = "ref_id")]
    reference_id: String,
    #[serde(default)]
    reason: String,
}

async fn deposit(
    State(ledger): State<Arc<Ledger>>,
    Path(account_id): Path<String>,
    Json(req): Json<AmountRequest>,
) -> CoreResult<Json<Transaction>> {
    Ok(Json(ledger.deposit(&account_id, req.amount, &req.reference_id, &req.reason).await?))
}

async fn freeze(
    State(ledger): State<Arc<Ledger>>,
    Path(account_id): Path<String>,
    Json(req): Json<AmountRequest>,
) -> CoreResult<Json<Transaction>> {
    Ok(Json(ledger.freeze(&account_id, req.amount, &req.reference_id, &req.reason).await?))
}

async fn unfreeze(
    State(ledger): State<Arc<Ledger>>,
    Path(account_id): Path<String>,
    Json(req): Json<AmountRequest>,
) -> CoreResult<Json<Transaction>> {
    Ok(Json(ledger.unfreeze(&account_id, req.amount, &req.reference_id, &req.reason).await?))
}

#[derive(Deserialize)]
struct DeductRequest {
    amount: Decimal,
    #[serde(rename = "ref_id")]
    reference_id: String,
    #[serde(default)]
    from_frozen: bool,
    #[serde(default)]
    reason: String,
}

async fn deduct(
    State(ledger): State<Arc<Ledger>>,
    Path(account_id): Path<String>,
    Json(req): Json<DeductRequest>,
) -> CoreResult<Json<Transaction>> {
    Ok(Json(ledger.deduct(&account_id, req.amount, req.from_frozen, &req.reference_id, &req.reason).await?))
}

#[derive(Deserialize)]
struct TransferRequest {
    from_id: String,
    to_id: String,
    amount: Decimal,
    #[serde(rename = "ref_id")]
    reference_id: String,
    #[serde(default)]
    remark: String,
}

#[derive(Serialize)]
struct TransferResponse {
    from_transaction: Transaction,
    to_transaction: Transaction,
}

async fn transfer(State(ledger): State<Arc<Ledger>>, Json(req): Json<TransferRequest>) -> CoreResult<Json<TransferResponse>> {
    let (from_transaction, to_transaction) =
        ledger.transfer(&req.from_id, &req.to_id, req.amount, &req.reference_id, &req.remark).await?;
    Ok(Json(TransferResponse { from_transaction, to_transaction }))
}

#[derive(Deserialize)]
struct TccRequest {
    global_tx_id: String,
    branch_id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    currency: String,
    amount: Decimal,
}

async fn tcc_try_freeze(State(ledger): State<Arc<Ledger>>, Json(req): Json<TccRequest>) -> CoreResult<Json<String>> {
    let tcc = crate::ledger::tcc::TccCoordinator::new(&ledger);
    Ok(Json(tcc.try_freeze(&req.global_tx_id, &req.branch_id, &req.user_id, &req.currency, req.amount).await?))
}

async fn tcc_confirm_freeze(State(ledger): State<Arc<Ledger>>, Json(req): Json<TccRequest>) -> CoreResult<()> {
    let tcc = crate::ledger::tcc::TccCoordinator::new(&ledger);
    tcc.confirm_freeze(&req.global_tx_id, &req.branch_id, req.amount).await
}

async fn tcc_cancel_freeze(State(ledger): State<Arc<Ledger>>, Json(req): Json<TccRequest>) -> CoreResult<()> {
    let tcc = crate::ledger::tcc::TccCoordinator::new(&ledger);
    tcc.cancel_freeze(&req.global_tx_id, &req.branch_id, req.amount).await
}
