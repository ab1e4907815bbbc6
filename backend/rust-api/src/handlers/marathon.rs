use axum::{
    body::Bytes,
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::extractors::{AppJson, AppQuery};
use crate::handlers::ApiError;
use crate::middlewares::auth::AuthenticatedPlayer;
use crate::models::dto::{
    ContinueRequest, MarathonAnswerRequest, MarathonLeaderboardQuery, StartMarathonRequest,
    UseBonusRequest, UseHintRequest,
};
use crate::models::MarathonGameId;
use crate::services::AppState;

/// POST /api/v1/marathon/start
pub async fn start(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    // the body is optional; an empty one means "all categories"
    let req: StartMarathonRequest = if body.is_empty() {
        StartMarathonRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::Validation(format!("Failed to parse JSON request body: {}", e))
        })?
    };
    let game = state
        .marathon_service()
        .start(&player.user_id, req.category_id.as_deref())
        .await?;
    Ok(Json(game))
}

/// POST /api/v1/marathon/{gameId}/answer
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(game_id): Path<String>,
    AppJson(req): AppJson<MarathonAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let game_id = MarathonGameId::parse(&game_id)?;
    let response = state
        .marathon_service()
        .answer(
            &player.user_id,
            game_id,
            req.question_id,
            req.answer_id,
            req.time_taken_ms,
        )
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/marathon/{gameId}/hint
pub async fn use_hint(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(game_id): Path<String>,
    AppJson(req): AppJson<UseHintRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let game_id = MarathonGameId::parse(&game_id)?;
    let response = state
        .marathon_service()
        .use_hint(&player.user_id, game_id, req.question_id, req.hint_type)
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/marathon/{gameId}/bonus
pub async fn use_bonus(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(game_id): Path<String>,
    AppJson(req): AppJson<UseBonusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let game_id = MarathonGameId::parse(&game_id)?;
    let response = state
        .marathon_service()
        .use_bonus(&player.user_id, game_id, req.question_id, req.bonus_type)
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/marathon/{gameId}/continue
pub async fn continue_game(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(game_id): Path<String>,
    AppJson(req): AppJson<ContinueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let game_id = MarathonGameId::parse(&game_id)?;
    let response = state
        .marathon_service()
        .continue_game(&player.user_id, game_id, req.payment_method)
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/marathon/{gameId}/abandon
pub async fn abandon(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(game_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let game_id = MarathonGameId::parse(&game_id)?;
    let game = state
        .marathon_service()
        .abandon(&player.user_id, game_id)
        .await?;
    Ok(Json(game))
}

/// GET /api/v1/marathon/status
pub async fn status(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
) -> Result<impl IntoResponse, ApiError> {
    let game = state.marathon_service().status(&player.user_id).await?;
    Ok(Json(json!({ "hasActiveGame": game.is_some(), "game": game })))
}

/// GET /api/v1/marathon/personal-bests
pub async fn personal_bests(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
) -> Result<impl IntoResponse, ApiError> {
    let bests = state
        .marathon_service()
        .personal_bests(&player.user_id)
        .await?;
    Ok(Json(json!({ "personalBests": bests })))
}

/// GET /api/v1/marathon/leaderboard?categoryId&limit&timeFrame
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<MarathonLeaderboardQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .marathon_service()
        .leaderboard(
            query.category_id.as_deref(),
            query.limit,
            query.time_frame.as_deref(),
        )
        .await?;
    Ok(Json(board))
}
