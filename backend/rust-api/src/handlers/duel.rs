use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::error::DomainError;
use crate::extractors::{AppJson, AppQuery};
use crate::handlers::ApiError;
use crate::middlewares::auth::AuthenticatedPlayer;
use crate::models::dto::{
    ChallengeAction, ClaimReferralRequest, DuelLeaderboardQuery, HistoryQuery,
    RespondChallengeRequest, SendChallengeRequest,
};
use crate::models::{ChallengeId, DuelMatchId, Milestone};
use crate::services::AppState;

/// POST /api/v1/duel/queue/join
pub async fn join_queue(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
) -> Result<impl IntoResponse, ApiError> {
    let queue = state.duel_service().join_queue(&player.user_id).await?;
    Ok(Json(queue))
}

/// DELETE /api/v1/duel/queue/leave
pub async fn leave_queue(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
) -> Result<impl IntoResponse, ApiError> {
    let queue = state.duel_service().leave_queue(&player.user_id).await?;
    Ok(Json(queue))
}

/// POST /api/v1/duel/challenge
pub async fn send_challenge(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    AppJson(req): AppJson<SendChallengeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let challenge = state
        .duel_service()
        .send_challenge(&player.user_id, &req.friend_id)
        .await?;
    Ok(Json(challenge))
}

/// POST /api/v1/duel/challenge/link
pub async fn create_challenge_link(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
) -> Result<impl IntoResponse, ApiError> {
    let challenge = state
        .duel_service()
        .create_challenge_link(&player.user_id)
        .await?;
    Ok(Json(challenge))
}

/// POST /api/v1/duel/challenge/{id}/respond
///
/// `id` is either a challenge id or the token of a shared link.
pub async fn respond_challenge(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(id): Path<String>,
    AppJson(req): AppJson<RespondChallengeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let accept = req.action == ChallengeAction::Accept;
    let service = state.duel_service();

    let response = match ChallengeId::parse(&id) {
        Ok(challenge_id) => {
            service
                .respond_challenge(&player.user_id, challenge_id, accept)
                .await?
        }
        Err(_) if accept => service.accept_link(&player.user_id, &id).await?,
        Err(_) => {
            return Err(DomainError::invalid("challenge links cannot be declined").into());
        }
    };
    Ok(Json(response))
}

/// GET /api/v1/duel/status
pub async fn status(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.duel_service().status(&player.user_id).await?;
    Ok(Json(status))
}

/// GET /api/v1/duel/history?limit
pub async fn history(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    AppQuery(query): AppQuery<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let matches = state
        .duel_service()
        .history(&player.user_id, query.limit)
        .await?;
    Ok(Json(json!({ "matches": matches })))
}

/// GET /api/v1/duel/leaderboard?type=seasonal|all_time|referrals&limit
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<DuelLeaderboardQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .duel_service()
        .leaderboard(query.kind, query.limit, None)
        .await?;
    Ok(Json(board))
}

/// GET /api/v1/duel/leaderboard/me?type&limit
///
/// Same board with the caller's rank.
pub async fn my_leaderboard(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    AppQuery(query): AppQuery<DuelLeaderboardQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .duel_service()
        .leaderboard(query.kind, query.limit, Some(&player.user_id))
        .await?;
    Ok(Json(board))
}

/// GET /api/v1/duel/referrals
pub async fn referrals(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
) -> Result<impl IntoResponse, ApiError> {
    let referrals = state.duel_service().referrals(&player.user_id).await?;
    Ok(Json(referrals))
}

/// POST /api/v1/duel/referrals/claim
pub async fn claim_referral_reward(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    AppJson(req): AppJson<ClaimReferralRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let milestone = Milestone::parse(&req.milestone)?;
    let claimed = state
        .duel_service()
        .claim_referral_reward(&player.user_id, &req.friend_id, milestone)
        .await?;
    Ok(Json(claimed))
}

/// POST /api/v1/duel/match/{id}/rematch
pub async fn request_rematch(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(match_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let match_id = DuelMatchId::parse(&match_id)?;
    let rematch = state
        .duel_service()
        .request_rematch(&player.user_id, match_id)
        .await?;
    Ok(Json(rematch))
}
