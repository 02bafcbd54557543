//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    ExpiryRecord, OperationContext, SettingsChanges, Transaction, TransactionKind, Transfer, Wallet,
    WalletKind, WalletSettings, WalletStatus,
};
use crate::error::{domain_status, AppError};
use crate::handlers::{
    AddCreditsCommand, BalanceView, Ledger, RuleVerdict, TransferCommand, TransferOutcome,
    VerificationReport, WalletOpCommand, WalletStats,
};
use crate::jobs::{self, AutoTransferReport, ExpiryRunReport, JobError};

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    pub owner_id: String,
    #[serde(default)]
    pub kind: WalletKind,
}

/// `?kind=` selector for owner-level endpoints (defaults to employee)
#[derive(Debug, Deserialize)]
pub struct KindQuery {
    #[serde(default)]
    pub kind: WalletKind,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    /// Transaction kind filter
    #[serde(default)]
    pub kind: Option<TransactionKind>,
    #[serde(default)]
    pub wallet_kind: WalletKind,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub owner_id: String,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: WalletStatus,
    #[serde(default)]
    pub kind: WalletKind,
}

#[derive(Debug, Deserialize)]
pub struct ValidateTransferRequest {
    pub from_owner_id: String,
    pub to_owner_id: String,
    pub amount: String,
    #[serde(default)]
    pub kind: WalletKind,
}

/// A transfer plus, when it failed, the typed reason
#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub transfer: Transfer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct PendingTransfersResponse {
    pub owner_id: String,
    pub transfers: Vec<Transfer>,
}

#[derive(Debug, Serialize)]
pub struct ExpiryJobResponse {
    pub expired: Vec<ExpiryRecord>,
    pub deferred: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AutoTransferJobResponse {
    pub transfers: Vec<Transfer>,
    pub completed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<Ledger> {
    Router::new()
        .route("/health", get(health))
        // Wallets
        .route("/wallets", post(create_wallet))
        .route("/owners/:owner_id/balance", get(get_balance))
        .route("/owners/:owner_id/history", get(get_history))
        .route("/owners/:owner_id/stats", get(get_stats))
        .route("/owners/:owner_id/verification", get(verify_wallet))
        .route("/owners/:owner_id/settings", get(get_settings).put(update_settings))
        .route("/owners/:owner_id/status", put(set_status))
        .route("/owners/:owner_id/expiries", get(get_expiries))
        .route("/owners/:owner_id/transfers/pending", get(pending_transfers))
        // Credits
        .route("/credits", post(add_credits))
        .route("/credits/reward", post(reward_credits))
        .route("/credits/freeze", post(freeze_credits))
        .route("/credits/unfreeze", post(unfreeze_credits))
        .route("/credits/deduct", post(deduct_credits))
        .route("/credits/penalize", post(penalize_credits))
        // Transfers
        .route("/transfers", post(transfer))
        .route("/transfers/validate", post(validate_transfer))
        .route("/transfers/escrow", post(create_escrow))
        .route("/transfers/:transfer_id", get(get_transfer))
        .route("/transfers/:transfer_id/settle", post(settle_transfer))
        .route("/transfers/:transfer_id/cancel", post(cancel_transfer))
        // Batch processors
        .route("/admin/jobs/expiry", post(run_expiry))
        .route("/admin/jobs/auto-transfers", post(run_auto_transfers))
}

// =========================================================================
// GET /health
// =========================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// =========================================================================
// Wallets
// =========================================================================

/// Get or create the wallet for (owner, kind)
async fn create_wallet(
    State(ledger): State<Ledger>,
    Json(request): Json<CreateWalletRequest>,
) -> Result<Json<Wallet>, AppError> {
    let wallet = ledger
        .wallets
        .get_or_create_wallet(&request.owner_id, request.kind)
        .await?;
    Ok(Json(wallet))
}

async fn get_balance(
    State(ledger): State<Ledger>,
    Path(owner_id): Path<String>,
    Query(query): Query<KindQuery>,
) -> Result<Json<BalanceView>, AppError> {
    Ok(Json(ledger.wallets.get_balance(&owner_id, query.kind).await?))
}

/// Ledger rows, newest first
async fn get_history(
    State(ledger): State<Ledger>,
    Path(owner_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let transactions = ledger
        .wallets
        .get_transaction_history(&owner_id, query.wallet_kind, query.limit, query.kind)
        .await?;

    Ok(Json(HistoryResponse {
        owner_id,
        transactions,
    }))
}

async fn get_stats(
    State(ledger): State<Ledger>,
    Path(owner_id): Path<String>,
    Query(query): Query<KindQuery>,
) -> Result<Json<WalletStats>, AppError> {
    Ok(Json(ledger.wallets.get_wallet_stats(&owner_id, query.kind).await?))
}

async fn verify_wallet(
    State(ledger): State<Ledger>,
    Path(owner_id): Path<String>,
    Query(query): Query<KindQuery>,
) -> Result<Json<VerificationReport>, AppError> {
    Ok(Json(ledger.verification.verify_wallet(&owner_id, query.kind).await?))
}

async fn get_settings(
    State(ledger): State<Ledger>,
    Path(owner_id): Path<String>,
    Query(query): Query<KindQuery>,
) -> Result<Json<WalletSettings>, AppError> {
    Ok(Json(ledger.wallets.get_settings(&owner_id, query.kind).await?))
}

async fn update_settings(
    State(ledger): State<Ledger>,
    Extension(context): Extension<OperationContext>,
    Path(owner_id): Path<String>,
    Query(query): Query<KindQuery>,
    Json(changes): Json<SettingsChanges>,
) -> Result<Json<WalletSettings>, AppError> {
    let settings = ledger
        .wallets
        .update_settings(&owner_id, query.kind, changes, &context)
        .await?;
    Ok(Json(settings))
}

async fn set_status(
    State(ledger): State<Ledger>,
    Extension(context): Extension<OperationContext>,
    Path(owner_id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Wallet>, AppError> {
    let wallet = ledger
        .wallets
        .set_wallet_status(&owner_id, request.kind, request.status, &context)
        .await?;
    Ok(Json(wallet))
}

async fn get_expiries(
    State(ledger): State<Ledger>,
    Path(owner_id): Path<String>,
    Query(query): Query<KindQuery>,
) -> Result<Json<Vec<ExpiryRecord>>, AppError> {
    Ok(Json(ledger.wallets.get_expiries(&owner_id, query.kind).await?))
}

async fn pending_transfers(
    State(ledger): State<Ledger>,
    Path(owner_id): Path<String>,
    Query(query): Query<KindQuery>,
) -> Result<Json<PendingTransfersResponse>, AppError> {
    let transfers = ledger.transfers.pending_transfers(&owner_id, query.kind).await?;
    Ok(Json(PendingTransfersResponse { owner_id, transfers }))
}

// =========================================================================
// Credits
// =========================================================================

async fn add_credits(
    State(ledger): State<Ledger>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<AddCreditsCommand>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let tx = ledger.wallets.add_credits(command, &context).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

async fn reward_credits(
    State(ledger): State<Ledger>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<AddCreditsCommand>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let tx = ledger.wallets.reward_credits(command, &context).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

async fn freeze_credits(
    State(ledger): State<Ledger>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<WalletOpCommand>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let tx = ledger.wallets.freeze_credits(command, &context).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

async fn unfreeze_credits(
    State(ledger): State<Ledger>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<WalletOpCommand>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let tx = ledger.wallets.unfreeze_credits(command, &context).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

async fn deduct_credits(
    State(ledger): State<Ledger>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<WalletOpCommand>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let tx = ledger.wallets.deduct_credits(command, &context).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

async fn penalize_credits(
    State(ledger): State<Ledger>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<WalletOpCommand>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let tx = ledger.wallets.penalize_credits(command, &context).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

// =========================================================================
// Transfers
// =========================================================================

/// Failed transfers are still recorded; they come back with the status
/// code of their error and the transfer in the body.
fn outcome_response(outcome: TransferOutcome, success: StatusCode) -> (StatusCode, Json<TransferResponse>) {
    match outcome.error {
        None => (
            success,
            Json(TransferResponse {
                transfer: outcome.transfer,
                error: None,
                error_code: None,
            }),
        ),
        Some(e) => (
            domain_status(&e),
            Json(TransferResponse {
                transfer: outcome.transfer,
                error: Some(e.to_string()),
                error_code: Some(e.code()),
            }),
        ),
    }
}

async fn transfer(
    State(ledger): State<Ledger>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<TransferCommand>,
) -> Result<(StatusCode, Json<TransferResponse>), AppError> {
    let outcome = ledger.transfers.transfer_credits(command, &context).await?;
    Ok(outcome_response(outcome, StatusCode::CREATED))
}

/// Dry-run of the transfer rules
async fn validate_transfer(
    State(ledger): State<Ledger>,
    Json(request): Json<ValidateTransferRequest>,
) -> Result<Json<RuleVerdict>, AppError> {
    let verdict = ledger
        .transfers
        .validate_transfer_rules(&request.from_owner_id, &request.to_owner_id, &request.amount, request.kind)
        .await?;
    Ok(Json(verdict))
}

async fn create_escrow(
    State(ledger): State<Ledger>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<TransferCommand>,
) -> Result<(StatusCode, Json<TransferResponse>), AppError> {
    let outcome = ledger.transfers.create_escrow_transfer(command, &context).await?;
    Ok(outcome_response(outcome, StatusCode::CREATED))
}

async fn get_transfer(
    State(ledger): State<Ledger>,
    Path(transfer_id): Path<Uuid>,
) -> Result<Json<Transfer>, AppError> {
    Ok(Json(ledger.transfers.get_transfer(transfer_id).await?))
}

async fn settle_transfer(
    State(ledger): State<Ledger>,
    Extension(context): Extension<OperationContext>,
    Path(transfer_id): Path<Uuid>,
) -> Result<(StatusCode, Json<TransferResponse>), AppError> {
    let outcome = ledger.transfers.settle_transfer(transfer_id, &context).await?;
    Ok(outcome_response(outcome, StatusCode::OK))
}

async fn cancel_transfer(
    State(ledger): State<Ledger>,
    Extension(context): Extension<OperationContext>,
    Path(transfer_id): Path<Uuid>,
) -> Result<Json<Transfer>, AppError> {
    Ok(Json(ledger.transfers.cancel_transfer(transfer_id, &context).await?))
}

// =========================================================================
// Batch processors
// =========================================================================

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Store(e) => e.into(),
        }
    }
}

impl From<ExpiryRunReport> for ExpiryJobResponse {
    fn from(report: ExpiryRunReport) -> Self {
        Self {
            expired: report.expired,
            deferred: report.deferred,
            skipped: report.skipped,
            errors: report.errors,
            completed_at: Utc::now(),
        }
    }
}

impl From<AutoTransferReport> for AutoTransferJobResponse {
    fn from(report: AutoTransferReport) -> Self {
        Self {
            completed: report.completed(),
            transfers: report.transfers,
            skipped: report.skipped,
            errors: report.errors,
            completed_at: Utc::now(),
        }
    }
}

async fn run_expiry(State(ledger): State<Ledger>) -> Result<Json<ExpiryJobResponse>, AppError> {
    let report = jobs::process_credit_expiry(ledger.store(), Utc::now()).await?;
    Ok(Json(report.into()))
}

async fn run_auto_transfers(State(ledger): State<Ledger>) -> Result<Json<AutoTransferJobResponse>, AppError> {
    let report = jobs::process_auto_transfers(&ledger).await?;
    Ok(Json(report.into()))
}
