//! Custody HTTP surface (spec.md §6 "Custody service").

use crate::errors::CoreResult;
use crate::vault::{AssetVault, CorpAction, CorpActionService, CorpActionType, CustodyTransfer, VaultService, VaultType};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router(vaults: Arc<VaultService>) -> Router {
    Router::new()
        .route("/vaults/find-or-create", post(find_or_create))
        .route("/vaults/:vault_id", get(get_holding))
        .route("/transfer", post(transfer_internal))
        .route("/segregate/:user_id", post(segregate))
        .route("/corp-actions", post(announce_action))
        .route("/corp-actions/:action_id/execute", post(execute_batch_action))
        .with_state(vaults)
}

#[derive(Deserialize)]
struct FindOrCreateRequest {
    vault_type: VaultType,
    user_id: Option<String>,
    symbol: String,
}

async fn find_or_create(State(vaults): State<Arc<VaultService>>, Json(req): Json<FindOrCreateRequest>) -> CoreResult<Json<AssetVault>> {
    Ok(Json(vaults.find_or_create(req.vault_type, req.user_id.as_deref(), &req.symbol).await?))
}

async fn get_holding(State(vaults): State<Arc<VaultService>>, Path(vault_id): Path<String>) -> CoreResult<Json<AssetVault>> {
    Ok(Json(vaults.get_holding(&vault_id).await?))
}

#[derive(Deserialize)]
struct TransferInternalRequest {
    from_vault: String,
    to_vault: String,
    symbol: String,
    amount: i64,
    #[serde(default)]
    reason: String,
}

async fn transfer_internal(
    State(vaults): State<Arc<VaultService>>,
    Json(req): Json<TransferInternalRequest>,
) -> CoreResult<Json<CustodyTransfer>> {
    Ok(Json(vaults.transfer_internal(&req.from_vault, &req.to_vault, &req.symbol, req.amount, &req.reason).await?))
}

#[derive(Serialize)]
struct SegregateResponse {
    vaults_processed: u32,
}

async fn segregate(State(vaults): State<Arc<VaultService>>, Path(user_id): Path<String>) -> CoreResult<Json<SegregateResponse>> {
    let vaults_processed = vaults.segregate_all_user_assets(&user_id).await?;
    Ok(Json(SegregateResponse { vaults_processed }))
}

#[derive(Deserialize)]
struct AnnounceActionRequest {
    symbol: String,
    action_type: CorpActionType,
    ratio: Decimal,
    record_date: DateTime<Utc>,
    ex_date: DateTime<Utc>,
    pay_date: DateTime<Utc>,
}

async fn announce_action(State(vaults): State<Arc<VaultService>>, Json(req): Json<AnnounceActionRequest>) -> CoreResult<Json<CorpAction>> {
    let corp_actions = CorpActionService::new(&vaults);
    Ok(Json(
        corp_actions
            .announce_action(&req.symbol, req.action_type, req.ratio, req.record_date, req.ex_date, req.pay_date)
            .await?,
    ))
}

#[derive(Serialize)]
struct ExecuteBatchActionResponse {
    vaults_processed: u32,
}

async fn execute_batch_action(
    State(vaults): State<Arc<VaultService>>,
    Path(action_id): Path<String>,
) -> CoreResult<Json<ExecuteBatchActionResponse>> {
    let corp_actions = CorpActionService::new(&vaults);
    let vaults_processed = corp_actions.execute_batch_action(&action_id, Utc::now()).await?;
    Ok(Json(ExecuteBatchActionResponse { vaults_processed }))
}
