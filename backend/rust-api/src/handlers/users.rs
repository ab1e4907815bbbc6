use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::extractors::AppJson;
use crate::handlers::ApiError;
use crate::middlewares::auth::AuthenticatedPlayer;
use crate::models::dto::{ProfileView, UpdateProfileRequest, UserView};
use crate::models::UserId;
use crate::services::AppState;

/// POST /api/v1/user/register
///
/// Creates the player from verified init data, or refreshes the stored profile.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
) -> Result<impl IntoResponse, ApiError> {
    let (user, wallet) = state.user_service().register(&player).await?;
    Ok(Json(ProfileView::new(&user, &wallet)))
}

/// GET /api/v1/user/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state.user_service();
    let user = users.get_profile(&player.user_id).await?;
    let wallet = users.wallet(&player.user_id).await?;
    Ok(Json(ProfileView::new(&user, &wallet)))
}

/// GET /api/v1/user/{id}
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = UserId::parse(&user_id)?;
    let user = state.user_service().get_profile(&user_id).await?;
    Ok(Json(UserView::from(&user)))
}

/// PUT /api/v1/user/{id}
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(player): Extension<AuthenticatedPlayer>,
    Path(user_id): Path<String>,
    AppJson(req): AppJson<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let user_id = UserId::parse(&user_id)?;
    let users = state.user_service();
    let user = users
        .update_profile(&player.user_id, &user_id, req.into())
        .await?;
    let wallet = users.wallet(&user.id).await?;
    Ok(Json(ProfileView::new(&user, &wallet)))
}

/// GET /api/v1/user/by-username/{username}
pub async fn get_by_username(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.user_service().find_by_username(&username).await?;
    Ok(Json(UserView::from(&user)))
}
