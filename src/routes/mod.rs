// ============================================================================
// HTTP ROUTES - Axum surface over the ledger, drafts and approvals
// ============================================================================
//
// Identity is the opaque `x-account-id` header set by the upstream identity
// provider. Handlers never trust an account id from the body for "who am I".
//
// Route Organization:
// - ledger.rs:  balances, entry history, withdrawal requests, deposit claims
// - drafts.rs:  draft lifecycle
// - admin.rs:   approval queue, battle resolution, settlement, roles
//
// Expected refusals map to 4xx; integrity violations map to 500 and are
// logged at error level.
//
// ============================================================================

pub mod admin;
pub mod drafts;
pub mod ledger;

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::access::{AccessControl, AccessError};
use crate::approvals::{ApprovalError, Approvals};
use crate::draft::{DraftEngine, DraftError};
use crate::ledger::{validate_account_id, LedgerError, LedgerStore};
use crate::settlement::SettlementError;
use crate::storage::StoreError;

pub const ACCOUNT_HEADER: &str = "x-account-id";

#[derive(Clone)]
pub struct AppState {
    pub ledger: LedgerStore,
    pub drafts: Arc<DraftEngine>,
    pub approvals: Approvals,
    pub access: AccessControl,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    fn internal(message: String) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = %self.message, "🚨 Request failed");
        } else {
            debug!(status = %self.status, code = self.code, message = %self.message, "Request refused");
        }
        (
            self.status,
            Json(json!({ "error": self.code, "message": self.message })),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        let message = e.to_string();
        match e {
            LedgerError::InsufficientBalance { .. } => {
                Self::new(StatusCode::CONFLICT, "insufficient_balance", message)
            }
            LedgerError::AccountNotFound(_) => Self::new(StatusCode::NOT_FOUND, "account_not_found", message),
            LedgerError::InvalidAccountId(_) | LedgerError::InvalidMutation(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
            }
            LedgerError::ReservationClosed(_) => Self::new(StatusCode::CONFLICT, "already_processed", message),
            LedgerError::Overflow(_) | LedgerError::ReconciliationMismatch { .. } | LedgerError::Store(_) => {
                Self::internal(message)
            }
        }
    }
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        let message = e.to_string();
        match e {
            SettlementError::AlreadySettled(_) => {
                Self::new(StatusCode::CONFLICT, "already_settled", message)
            }
            SettlementError::NotSettleable { .. } => {
                Self::new(StatusCode::CONFLICT, "invalid_transition", message)
            }
            SettlementError::Ledger(inner) => inner.into(),
        }
    }
}

impl From<DraftError> for ApiError {
    fn from(e: DraftError) -> Self {
        let message = e.to_string();
        match e {
            DraftError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "draft_not_found", message),
            DraftError::InvalidTransition { .. } => {
                Self::new(StatusCode::CONFLICT, "invalid_transition", message)
            }
            DraftError::InvalidPick { .. } => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_pick", message)
            }
            DraftError::Forbidden { .. } | DraftError::NotInvited(_) => {
                Self::new(StatusCode::FORBIDDEN, "forbidden", message)
            }
            DraftError::InvalidInput(_) => Self::new(StatusCode::BAD_REQUEST, "invalid_request", message),
            DraftError::AlreadySeated(_) | DraftError::SideFull(_) => {
                Self::new(StatusCode::CONFLICT, "seat_unavailable", message)
            }
            DraftError::PoolExhausted(_) => Self::internal(message),
            DraftError::Ledger(inner) => inner.into(),
            DraftError::Settlement(inner) => inner.into(),
            DraftError::Store(inner) => inner.into(),
        }
    }
}

impl From<ApprovalError> for ApiError {
    fn from(e: ApprovalError) -> Self {
        let message = e.to_string();
        match e {
            ApprovalError::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, "not_found", message),
            ApprovalError::AlreadyProcessed { .. } => {
                Self::new(StatusCode::CONFLICT, "already_processed", message)
            }
            ApprovalError::AccountMismatch { .. } | ApprovalError::InvalidInput(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
            }
            ApprovalError::Forbidden(_) => Self::new(StatusCode::FORBIDDEN, "forbidden", message),
            ApprovalError::Ledger(inner) => inner.into(),
            ApprovalError::Store(inner) => inner.into(),
        }
    }
}

impl From<AccessError> for ApiError {
    fn from(e: AccessError) -> Self {
        let message = e.to_string();
        match e {
            AccessError::Forbidden(_) => Self::new(StatusCode::FORBIDDEN, "forbidden", message),
            AccessError::LastAdmin => Self::new(StatusCode::CONFLICT, "last_admin", message),
            AccessError::Store(inner) => inner.into(),
        }
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// IDENTITY
// ============================================================================

/// Account id of the caller, from the `x-account-id` header.
#[derive(Debug, Clone)]
pub struct Caller(pub String);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .ok_or_else(|| {
                ApiError::new(StatusCode::UNAUTHORIZED, "unauthenticated", "missing x-account-id header")
            })?;
        validate_account_id(raw)
            .map_err(|e| ApiError::new(StatusCode::UNAUTHORIZED, "unauthenticated", e.to_string()))?;
        Ok(Caller(raw.to_string()))
    }
}

impl AppState {
    /// Owner or admin only.
    pub(crate) fn require_self_or_admin(&self, caller: &Caller, account_id: &str) -> Result<(), ApiError> {
        if caller.0 == account_id || self.access.is_admin(&caller.0) {
            Ok(())
        } else {
            Err(ApiError::new(
                StatusCode::FORBIDDEN,
                "forbidden",
                format!("{} may not read {}", caller.0, account_id),
            ))
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// GET /health
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at,
    }))
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        // Accounts
        .route("/accounts/{id}/balance", get(ledger::balance_handler))
        .route("/accounts/{id}/entries", get(ledger::entries_handler))
        .route("/withdrawals", post(ledger::request_withdrawal_handler))
        .route("/deposits", post(ledger::report_deposit_handler))
        // Drafts
        .route("/drafts", post(drafts::create_handler))
        .route("/drafts/{id}", get(drafts::get_handler))
        .route("/drafts/{id}/join", post(drafts::join_handler))
        .route("/drafts/{id}/leave", post(drafts::leave_handler))
        .route("/drafts/{id}/spectate", post(drafts::spectate_handler))
        .route("/drafts/{id}/start", post(drafts::start_handler))
        .route("/drafts/{id}/coin-flip", post(drafts::coin_flip_handler))
        .route("/drafts/{id}/picks", post(drafts::pick_handler))
        .route("/drafts/{id}/battles", post(drafts::battle_code_handler))
        .route("/drafts/{id}/verify", post(drafts::verify_handler))
        .route("/drafts/{id}/cancel", post(drafts::cancel_handler))
        // Admin
        .route("/admin/withdrawals", get(admin::pending_withdrawals_handler))
        .route("/admin/withdrawals/{id}/approve", post(admin::approve_withdrawal_handler))
        .route("/admin/withdrawals/{id}/reject", post(admin::reject_withdrawal_handler))
        .route("/admin/deposits", get(admin::pending_deposits_handler))
        .route("/admin/deposits/{id}/credit", post(admin::credit_deposit_handler))
        .route("/admin/deposits/{id}/dismiss", post(admin::dismiss_deposit_handler))
        .route(
            "/admin/drafts/{id}/battles/{index}/resolve",
            post(admin::resolve_battle_handler),
        )
        .route("/admin/drafts/{id}/settle", post(admin::settle_handler))
        .route("/admin/roles", post(admin::assign_role_handler))
        .route("/admin/reconcile/{id}", get(admin::reconcile_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
