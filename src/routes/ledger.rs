// ============================================================================
// LEDGER ROUTES - Balances, entry history, withdrawal and deposit requests
// ============================================================================

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::approvals::{DepositNotification, WithdrawalRequest};
use crate::ledger::{Amount, LedgerEntry};

use super::{ApiResult, AppState, Caller};

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 500;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account_id: String,
    pub balance: Amount,
}

/// GET /accounts/{id}/balance
pub async fn balance_handler(
    State(state): State<AppState>,
    caller: Caller,
    Path(account_id): Path<String>,
) -> ApiResult<BalanceResponse> {
    state.require_self_or_admin(&caller, &account_id)?;
    let balance = state.ledger.get_balance(&account_id)?;
    Ok(Json(BalanceResponse { account_id, balance }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntriesQuery {
    pub limit: Option<usize>,
    /// Cursor from a previous page's `next_before`.
    pub before: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    pub account_id: String,
    pub entries: Vec<LedgerEntry>,
    /// `None` once the oldest entry has been returned.
    pub next_before: Option<u64>,
}

/// GET /accounts/{id}/entries?limit=&before=
///
/// Newest first. Pass `next_before` back as `before` for the next page.
pub async fn entries_handler(
    State(state): State<AppState>,
    caller: Caller,
    Path(account_id): Path<String>,
    Query(query): Query<EntriesQuery>,
) -> ApiResult<EntriesResponse> {
    state.require_self_or_admin(&caller, &account_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);

    let mut iter = state
        .ledger
        .list_entries_before(&account_id, query.before)?
        .with_page_size(limit + 1);
    let mut entries = Vec::with_capacity(limit);
    for entry in iter.by_ref().take(limit) {
        entries.push(entry?);
    }
    // Peek one past the page to tell "exactly full" from "more to come".
    let next_before = match iter.next() {
        Some(next) => {
            let next = next?;
            Some(next.seq + 1)
        }
        None => None,
    };

    Ok(Json(EntriesResponse {
        account_id,
        entries,
        next_before,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WithdrawalBody {
    pub amount: Amount,
    pub destination_address: String,
}

/// POST /withdrawals
pub async fn request_withdrawal_handler(
    State(state): State<AppState>,
    Caller(account_id): Caller,
    Json(body): Json<WithdrawalBody>,
) -> ApiResult<WithdrawalRequest> {
    let request = state
        .approvals
        .request_withdrawal(&account_id, body.amount, &body.destination_address)?;
    Ok(Json(request))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DepositBody {
    pub claimed_amount: Amount,
    pub external_tx_reference: Option<String>,
    pub note: Option<String>,
}

/// POST /deposits
pub async fn report_deposit_handler(
    State(state): State<AppState>,
    Caller(account_id): Caller,
    Json(body): Json<DepositBody>,
) -> ApiResult<DepositNotification> {
    let notification = state.approvals.report_deposit(
        &account_id,
        body.claimed_amount,
        body.external_tx_reference,
        body.note,
    )?;
    Ok(Json(notification))
}
