// ============================================================================
// DRAFT ROUTES - Lifecycle, coin flip, picks and battle codes
// ============================================================================
//
// Handlers are thin: every rule lives in DraftEngine. Clients poll
// GET /drafts/{id}?since_version=N and receive 304 until something changes.
//
// ============================================================================

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::draft::{CoinChoice, CreateDraft, Draft, Side, SubmitPick};

use super::{ApiError, ApiResult, AppState, Caller};

/// POST /drafts
pub async fn create_handler(
    State(state): State<AppState>,
    Caller(creator): Caller,
    Json(body): Json<CreateDraft>,
) -> Result<(StatusCode, Json<Draft>), ApiError> {
    let draft = state.drafts.create(&creator, body)?;
    Ok((StatusCode::CREATED, Json(draft)))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetQuery {
    pub since_version: Option<u64>,
}

/// GET /drafts/{id}?since_version=
pub async fn get_handler(
    State(state): State<AppState>,
    _caller: Caller,
    Path(draft_id): Path<String>,
    Query(query): Query<GetQuery>,
) -> Result<Response, ApiError> {
    match query.since_version {
        Some(version) => match state.drafts.changed_since(&draft_id, version)? {
            Some(draft) => Ok(Json(draft).into_response()),
            None => Ok(StatusCode::NOT_MODIFIED.into_response()),
        },
        None => Ok(Json(state.drafts.get(&draft_id)?).into_response()),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinBody {
    pub side: Option<Side>,
}

/// POST /drafts/{id}/join
pub async fn join_handler(
    State(state): State<AppState>,
    Caller(account_id): Caller,
    Path(draft_id): Path<String>,
    Json(body): Json<JoinBody>,
) -> ApiResult<Draft> {
    Ok(Json(state.drafts.join(&draft_id, &account_id, body.side)?))
}

/// POST /drafts/{id}/leave
pub async fn leave_handler(
    State(state): State<AppState>,
    Caller(account_id): Caller,
    Path(draft_id): Path<String>,
) -> ApiResult<Draft> {
    Ok(Json(state.drafts.leave(&draft_id, &account_id)?))
}

/// POST /drafts/{id}/spectate
pub async fn spectate_handler(
    State(state): State<AppState>,
    Caller(account_id): Caller,
    Path(draft_id): Path<String>,
) -> ApiResult<Draft> {
    Ok(Json(state.drafts.spectate(&draft_id, &account_id)?))
}

/// POST /drafts/{id}/start
pub async fn start_handler(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(draft_id): Path<String>,
) -> ApiResult<Draft> {
    Ok(Json(state.drafts.start(&draft_id, &actor)?))
}

/// POST /drafts/{id}/coin-flip
pub async fn coin_flip_handler(
    State(state): State<AppState>,
    Caller(account_id): Caller,
    Path(draft_id): Path<String>,
    Json(choice): Json<CoinChoice>,
) -> ApiResult<Draft> {
    Ok(Json(state.drafts.lock_coin_flip(&draft_id, &account_id, choice)?))
}

/// POST /drafts/{id}/picks
pub async fn pick_handler(
    State(state): State<AppState>,
    Caller(account_id): Caller,
    Path(draft_id): Path<String>,
    Json(pick): Json<SubmitPick>,
) -> ApiResult<Draft> {
    Ok(Json(state.drafts.submit_pick(&draft_id, &account_id, pick)?))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BattleCodeBody {
    pub battle_index: usize,
    pub battle_code: String,
}

/// POST /drafts/{id}/battles
pub async fn battle_code_handler(
    State(state): State<AppState>,
    Caller(account_id): Caller,
    Path(draft_id): Path<String>,
    Json(body): Json<BattleCodeBody>,
) -> ApiResult<Draft> {
    let draft = state.drafts.submit_battle_code(
        &draft_id,
        &account_id,
        body.battle_index,
        &body.battle_code,
    )?;
    Ok(Json(draft))
}

/// POST /drafts/{id}/verify
///
/// Polls the match oracle for every battle that is due. Safe to call as
/// often as clients like; battles still in backoff are skipped.
pub async fn verify_handler(
    State(state): State<AppState>,
    _caller: Caller,
    Path(draft_id): Path<String>,
) -> ApiResult<Draft> {
    Ok(Json(state.drafts.verify(&draft_id).await?))
}

/// POST /drafts/{id}/cancel
pub async fn cancel_handler(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(draft_id): Path<String>,
) -> ApiResult<Draft> {
    Ok(Json(state.drafts.cancel(&draft_id, &actor)?))
}
