use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::sync::Arc;

use crate::error::{DomainError, ErrorKind};
use crate::metrics;
use crate::services::AppState;

pub mod admin;
pub mod daily_challenge;
pub mod duel;
pub mod duel_ws;
pub mod marathon;
pub mod quiz;
pub mod users;

/// Error body shared by every JSON handler: `{message, status, kind}`.
#[derive(Debug)]
pub enum ApiError {
    Domain(DomainError),
    Validation(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Domain(err) => match err.kind() {
                ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::ExhaustedResource
                | ErrorKind::StateViolation
                | ErrorKind::NotAvailable => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Validation(_) => ErrorKind::InvalidInput,
            ApiError::Domain(err) => err.kind(),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(format!("Validation error: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let message = match self {
            // storage details stay in the logs
            ApiError::Domain(err) if err.kind() == ErrorKind::Internal => {
                tracing::error!("Request failed: {}", err);
                "Internal server error".to_string()
            }
            ApiError::Domain(err) => err.to_string(),
            ApiError::Validation(message) => message,
        };

        (
            status,
            Json(json!({
                "message": message,
                "status": status.as_u16(),
                "kind": kind,
            })),
        )
            .into_response()
    }
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut dependencies = serde_json::Map::new();
    let mut all_healthy = true;

    if state.mongo.is_some() {
        let mongo_health = check_mongodb(&state).await;
        all_healthy &= is_healthy(&mongo_health);
        dependencies.insert("mongodb".to_string(), json!(mongo_health));
    } else {
        dependencies.insert("storage".to_string(), json!({ "status": "in_memory" }));
    }

    if state.redis.is_some() {
        let redis_health = check_redis(&state).await;
        all_healthy &= is_healthy(&redis_health);
        dependencies.insert("redis".to_string(), json!(redis_health));
    }

    let (status_code, status) = if all_healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "quizsprint-api",
            "version": env!("CARGO_PKG_VERSION"),
            "activeDuels": state.duel_hub.active_matches().await,
            "dependencies": dependencies
        })),
    )
}

fn is_healthy(result: &serde_json::Map<String, serde_json::Value>) -> bool {
    result.get("status").and_then(|v| v.as_str()) == Some("healthy")
}

async fn check_mongodb(state: &AppState) -> serde_json::Map<String, serde_json::Value> {
    let mut result = serde_json::Map::new();
    let Some(store) = state.mongo.as_ref() else {
        return result;
    };

    match tokio::time::timeout(std::time::Duration::from_secs(1), store.ping()).await {
        Ok(Ok(())) => {
            result.insert("status".to_string(), json!("healthy"));
            result.insert(
                "message".to_string(),
                json!("MongoDB connection successful"),
            );
        }
        Ok(Err(e)) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!(format!("MongoDB error: {}", e)));
        }
        Err(_) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!("MongoDB timeout after 1s"));
        }
    }

    result
}

async fn check_redis(state: &AppState) -> serde_json::Map<String, serde_json::Value> {
    let mut result = serde_json::Map::new();
    let Some(mut conn) = state.redis.clone() else {
        return result;
    };

    match tokio::time::timeout(
        std::time::Duration::from_millis(500),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    {
        Ok(Ok(_)) => {
            result.insert("status".to_string(), json!("healthy"));
            result.insert("message".to_string(), json!("Redis connection successful"));
        }
        Ok(Err(e)) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!(format!("Redis error: {}", e)));
        }
        Err(_) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!("Redis timeout after 500ms"));
        }
    }

    result
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// Protects /metrics with HTTP Basic auth against `METRICS_AUTH` (`user:password`)
pub async fn metrics_auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let encoded = auth_header
        .strip_prefix("Basic ")
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    let expected = std::env::var("METRICS_AUTH").unwrap_or_else(|_| "admin:changeme".to_string());
    if credentials != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_statuses() {
        let cases = [
            (DomainError::invalid("x"), StatusCode::BAD_REQUEST),
            (DomainError::unauthorized("x"), StatusCode::FORBIDDEN),
            (DomainError::not_found("x"), StatusCode::NOT_FOUND),
            (DomainError::conflict("x"), StatusCode::CONFLICT),
            (DomainError::exhausted("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::state("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::not_available("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
