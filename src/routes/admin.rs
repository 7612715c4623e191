// ============================================================================
// ADMIN ROUTES - Approval queue, battle resolution, settlement, roles
// ============================================================================
//
// Every handler here checks the caller's role through the module it calls;
// a non-admin gets 403 and nothing changes.
//
// ============================================================================

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::access::{Role, RoleAssignment};
use crate::approvals::{DepositNotification, WithdrawalRequest};
use crate::draft::{BattleResolution, Draft};
use crate::ledger::{Amount, Receipt, Reconciliation};
use crate::settlement::SettlementSummary;

use super::{ApiResult, AppState, Caller};

// ============================================================================
// WITHDRAWALS
// ============================================================================

/// GET /admin/withdrawals
pub async fn pending_withdrawals_handler(
    State(state): State<AppState>,
    Caller(admin): Caller,
) -> ApiResult<Vec<WithdrawalRequest>> {
    Ok(Json(state.approvals.pending_withdrawals(&admin)?))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApproveBody {
    pub tx_reference: String,
}

/// POST /admin/withdrawals/{id}/approve
pub async fn approve_withdrawal_handler(
    State(state): State<AppState>,
    Caller(admin): Caller,
    Path(request_id): Path<String>,
    Json(body): Json<ApproveBody>,
) -> ApiResult<WithdrawalRequest> {
    let request = state
        .approvals
        .approve_withdrawal(&admin, &request_id, &body.tx_reference)?;
    Ok(Json(request))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RejectBody {
    pub reason: Option<String>,
}

/// POST /admin/withdrawals/{id}/reject
pub async fn reject_withdrawal_handler(
    State(state): State<AppState>,
    Caller(admin): Caller,
    Path(request_id): Path<String>,
    Json(body): Json<RejectBody>,
) -> ApiResult<WithdrawalRequest> {
    let request = state
        .approvals
        .reject_withdrawal(&admin, &request_id, body.reason)?;
    Ok(Json(request))
}

// ============================================================================
// DEPOSITS
// ============================================================================

/// GET /admin/deposits
pub async fn pending_deposits_handler(
    State(state): State<AppState>,
    Caller(admin): Caller,
) -> ApiResult<Vec<DepositNotification>> {
    Ok(Json(state.approvals.pending_deposits(&admin)?))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreditBody {
    /// Must match the notification's owner.
    pub account_id: String,
    pub verified_amount: Amount,
}

#[derive(Debug, Serialize)]
pub struct CreditResponse {
    pub notification: DepositNotification,
    pub receipt: Receipt,
}

/// POST /admin/deposits/{id}/credit
pub async fn credit_deposit_handler(
    State(state): State<AppState>,
    Caller(admin): Caller,
    Path(notification_id): Path<String>,
    Json(body): Json<CreditBody>,
) -> ApiResult<CreditResponse> {
    let (notification, receipt) = state.approvals.credit_deposit(
        &admin,
        &notification_id,
        &body.account_id,
        body.verified_amount,
    )?;
    Ok(Json(CreditResponse { notification, receipt }))
}

/// POST /admin/deposits/{id}/dismiss
pub async fn dismiss_deposit_handler(
    State(state): State<AppState>,
    Caller(admin): Caller,
    Path(notification_id): Path<String>,
) -> ApiResult<DepositNotification> {
    Ok(Json(state.approvals.dismiss_deposit(&admin, &notification_id)?))
}

// ============================================================================
// DRAFTS
// ============================================================================

/// POST /admin/drafts/{id}/battles/{index}/resolve
pub async fn resolve_battle_handler(
    State(state): State<AppState>,
    Caller(admin): Caller,
    Path((draft_id, index)): Path<(String, usize)>,
    Json(resolution): Json<BattleResolution>,
) -> ApiResult<Draft> {
    let draft = state
        .drafts
        .resolve_battle(&draft_id, &admin, index, resolution)?;
    Ok(Json(draft))
}

/// POST /admin/drafts/{id}/settle
pub async fn settle_handler(
    State(state): State<AppState>,
    Caller(admin): Caller,
    Path(draft_id): Path<String>,
) -> ApiResult<SettlementSummary> {
    Ok(Json(state.drafts.settle(&draft_id, &admin)?))
}

// ============================================================================
// ROLES & RECONCILIATION
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignRoleBody {
    pub account_id: String,
    pub role: Role,
}

/// POST /admin/roles
pub async fn assign_role_handler(
    State(state): State<AppState>,
    Caller(admin): Caller,
    Json(body): Json<AssignRoleBody>,
) -> ApiResult<RoleAssignment> {
    crate::ledger::validate_account_id(&body.account_id)?;
    Ok(Json(state.access.assign(&admin, &body.account_id, body.role)?))
}

/// GET /admin/reconcile/{id}
pub async fn reconcile_handler(
    State(state): State<AppState>,
    Caller(admin): Caller,
    Path(account_id): Path<String>,
) -> ApiResult<Reconciliation> {
    state.access.require_admin(&admin)?;
    Ok(Json(state.ledger.reconcile(&account_id)?))
}
