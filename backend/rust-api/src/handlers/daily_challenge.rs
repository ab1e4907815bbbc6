use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::extractors::{AppJson, AppQuery};
use crate::handlers::ApiError;
use crate::middlewares::auth::AuthenticatedPlayer;
use crate::models::dto::{DailyAnswerRequest, DailyLeaderboardQuery, RetryRequest};
use crate::models::DailyGameId;
use crate::services::AppState;

/// POST /api/v1/daily-challenge/start
pub async fn start(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
) -> Result<impl IntoResponse, ApiError> {
    let game = state.daily_service().start(&player.user_id).await?;
    Ok(Json(game))
}

/// POST /api/v1/daily-challenge/{gameId}/answer
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(game_id): Path<String>,
    AppJson(req): AppJson<DailyAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let game_id = DailyGameId::parse(&game_id)?;
    let response = state
        .daily_service()
        .submit_answer(
            &player.user_id,
            game_id,
            req.question_id,
            req.answer_id,
            req.time_taken_ms,
        )
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/daily-challenge/{gameId}/retry
pub async fn retry(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(game_id): Path<String>,
    AppJson(req): AppJson<RetryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let game_id = DailyGameId::parse(&game_id)?;
    let game = state
        .daily_service()
        .retry(&player.user_id, game_id, req.payment_method)
        .await?;
    Ok(Json(game))
}

/// POST /api/v1/daily-challenge/{gameId}/chest/open
pub async fn open_chest(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(game_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let game_id = DailyGameId::parse(&game_id)?;
    let chest = state
        .daily_service()
        .open_chest(&player.user_id, game_id)
        .await?;
    Ok(Json(chest))
}

/// GET /api/v1/daily-challenge/status
pub async fn status(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.daily_service().status(&player.user_id).await?;
    Ok(Json(status))
}

/// GET /api/v1/daily-challenge/leaderboard?date&limit
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    AppQuery(query): AppQuery<DailyLeaderboardQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .daily_service()
        .leaderboard(query.date, query.limit, Some(&player.user_id))
        .await?;
    Ok(Json(board))
}

/// GET /api/v1/daily-challenge/streak
pub async fn streak(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
) -> Result<impl IntoResponse, ApiError> {
    let streak = state.daily_service().streak(&player.user_id).await?;
    Ok(Json(streak))
}
