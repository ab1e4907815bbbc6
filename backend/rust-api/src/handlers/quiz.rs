use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::extractors::{AppJson, AppQuery};
use crate::handlers::ApiError;
use crate::middlewares::auth::AuthenticatedPlayer;
use crate::models::dto::{CreateCategoryRequest, LeaderboardQuery, QuizAnswerRequest};
use crate::models::{QuizId, SessionId};
use crate::services::AppState;

/// GET /api/v1/quiz
pub async fn list_quizzes(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let quizzes = state.quiz_service().list_quizzes().await?;
    Ok(Json(json!({ "quizzes": quizzes })))
}

/// GET /api/v1/quiz/{id}
pub async fn get_quiz(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let quiz_id = QuizId::parse(&quiz_id)?;
    let quiz = state.quiz_service().get_quiz(quiz_id).await?;
    Ok(Json(quiz))
}

/// POST /api/v1/quiz/{id}/start
pub async fn start(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let quiz_id = QuizId::parse(&quiz_id)?;
    let started = state.quiz_service().start(&player.user_id, quiz_id).await?;
    Ok((StatusCode::CREATED, Json(started)))
}

/// GET /api/v1/quiz/{id}/leaderboard?limit
pub async fn quiz_leaderboard(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
    AppQuery(query): AppQuery<LeaderboardQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let quiz_id = QuizId::parse(&quiz_id)?;
    let entries = state
        .quiz_service()
        .quiz_leaderboard(quiz_id, query.limit)
        .await?;
    Ok(Json(json!({ "entries": entries })))
}

/// POST /api/v1/quiz/session/{sessionId}/answer
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<QuizAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = SessionId::parse(&session_id)?;
    let response = state
        .quiz_service()
        .submit_answer(&player.user_id, session_id, req.question_id, req.answer_id)
        .await?;
    Ok(Json(response))
}

/// GET /api/v1/quiz/session/{sessionId}
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = SessionId::parse(&session_id)?;
    let session = state
        .quiz_service()
        .get_session(&player.user_id, session_id)
        .await?;
    Ok(Json(session))
}

/// DELETE /api/v1/quiz/session/{sessionId}
pub async fn abandon_session(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = SessionId::parse(&session_id)?;
    let session = state
        .quiz_service()
        .abandon(&player.user_id, session_id)
        .await?;
    Ok(Json(session))
}

/// GET /api/v1/leaderboard?limit
pub async fn global_leaderboard(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<LeaderboardQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state.quiz_service().global_leaderboard(query.limit).await?;
    Ok(Json(json!({ "entries": entries })))
}

/// GET /api/v1/categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let categories = state.quiz_service().list_categories().await?;
    Ok(Json(json!({ "categories": categories })))
}

/// POST /api/v1/categories
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateCategoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let category = state.quiz_service().create_category(&req.name).await?;
    Ok((StatusCode::CREATED, Json(category)))
}
