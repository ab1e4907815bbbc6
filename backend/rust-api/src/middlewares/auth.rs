use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;

use crate::models::UserId;
use crate::services::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const AUTH_SCHEME: &str = "tma ";
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Player identity proven by a valid init data signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPlayer {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub language_code: Option<String>,
    pub auth_date: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    MissingHeader,
    InvalidScheme,
    InvalidEncoding,
    MissingHash,
    InvalidSignature,
    Expired,
    MissingUser,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingHeader => write!(f, "Missing Authorization header"),
            AuthError::InvalidScheme => write!(f, "Expected 'tma <init-data>' authorization"),
            AuthError::InvalidEncoding => write!(f, "Init data is not valid base64"),
            AuthError::MissingHash => write!(f, "Init data has no hash"),
            AuthError::InvalidSignature => write!(f, "Init data signature mismatch"),
            AuthError::Expired => write!(f, "Init data expired"),
            AuthError::MissingUser => write!(f, "Init data has no user"),
        }
    }
}

impl std::error::Error for AuthError {}

#[derive(Debug, Deserialize)]
struct InitDataUser {
    id: i64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    language_code: Option<String>,
}

fn secret_key(bot_token: &str) -> Result<HmacSha256, AuthError> {
    let mut derive =
        HmacSha256::new_from_slice(b"WebAppData").map_err(|_| AuthError::InvalidSignature)?;
    derive.update(bot_token.as_bytes());
    let secret = derive.finalize().into_bytes();
    HmacSha256::new_from_slice(&secret).map_err(|_| AuthError::InvalidSignature)
}

fn data_check_string(pairs: &[(String, String)]) -> String {
    let mut fields: Vec<String> = pairs
        .iter()
        .filter(|(key, _)| key != "hash")
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    fields.sort();
    fields.join("\n")
}

/// Checks the init data signature and freshness, then extracts the player.
pub fn verify_init_data(
    raw: &str,
    bot_token: &str,
    max_age_secs: i64,
    now: i64,
) -> Result<AuthenticatedPlayer, AuthError> {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(raw.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let hash = pairs
        .iter()
        .find(|(key, _)| key == "hash")
        .map(|(_, value)| value.clone())
        .ok_or(AuthError::MissingHash)?;
    let expected = hex::decode(hash).map_err(|_| AuthError::InvalidSignature)?;

    let mut mac = secret_key(bot_token)?;
    mac.update(data_check_string(&pairs).as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| AuthError::InvalidSignature)?;

    let auth_date = pairs
        .iter()
        .find(|(key, _)| key == "auth_date")
        .and_then(|(_, value)| value.parse::<i64>().ok())
        .ok_or(AuthError::Expired)?;
    if now - auth_date > max_age_secs {
        return Err(AuthError::Expired);
    }

    let user: InitDataUser = pairs
        .iter()
        .find(|(key, _)| key == "user")
        .and_then(|(_, value)| serde_json::from_str(value).ok())
        .ok_or(AuthError::MissingUser)?;

    Ok(AuthenticatedPlayer {
        user_id: UserId::from_platform(user.id),
        username: user.username,
        first_name: user.first_name,
        language_code: user.language_code,
        auth_date,
    })
}

/// Builds a signed init data string. Used by tooling and tests to produce valid credentials.
pub fn sign_init_data(fields: &[(&str, &str)], bot_token: &str) -> String {
    let pairs: Vec<(String, String)> = fields
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    let hash = match secret_key(bot_token) {
        Ok(mut mac) => {
            mac.update(data_check_string(&pairs).as_bytes());
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    };

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key, value);
    }
    serializer.append_pair("hash", &hash);
    serializer.finish()
}

pub(crate) fn unauthorized(message: String) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "message": message,
            "status": 401,
            "kind": "unauthenticated"
        })),
    )
        .into_response()
}

pub(crate) fn parse_header(headers: &HeaderMap) -> Result<String, AuthError> {
    let value = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;
    let encoded = value
        .strip_prefix(AUTH_SCHEME)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::InvalidScheme)?;
    decode_init_data(encoded)
}

/// Base64 init data as sent in the header or the WebSocket `initData` parameter.
pub fn decode_init_data(encoded: &str) -> Result<String, AuthError> {
    let decoded = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::InvalidEncoding)?;
    String::from_utf8(decoded).map_err(|_| AuthError::InvalidEncoding)
}

/// Validates `Authorization: tma <base64 init data>` and stores the player in request extensions
pub async fn telegram_auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let raw = parse_header(&headers).map_err(|e| {
        tracing::warn!("Rejected request: {}", e);
        unauthorized(e.to_string())
    })?;

    let player = verify_init_data(
        &raw,
        &state.config.telegram_bot_token,
        state.config.init_data_max_age_secs,
        state.clock.now(),
    )
    .map_err(|e| {
        tracing::warn!("Init data validation failed: {}", e);
        unauthorized(e.to_string())
    })?;

    tracing::debug!("Authenticated player: {}", player.user_id);

    request.extensions_mut().insert(player);

    Ok(next.run(request).await)
}

/// Guards content management routes with the configured `X-Admin-Key`
pub async fn admin_key_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let Some(expected) = state.config.admin_api_key.as_deref() else {
        tracing::warn!("Admin route called but ADMIN_API_KEY is not configured");
        return Err(unauthorized("Admin access is disabled".to_string()));
    };

    let provided = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if provided.as_bytes() != expected.as_bytes() {
        tracing::warn!("Access denied: invalid admin key");
        return Err(unauthorized("Invalid admin key".to_string()));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "12345:test-bot-token";
    const USER: &str = r#"{"id":4242,"username":"alice_q","first_name":"Alice","language_code":"en"}"#;

    fn signed(auth_date: &str) -> String {
        sign_init_data(&[("auth_date", auth_date), ("query_id", "AAH"), ("user", USER)], TOKEN)
    }

    #[test]
    fn test_valid_init_data_yields_player() {
        let player = verify_init_data(&signed("1000"), TOKEN, 3600, 1500).unwrap();
        assert_eq!(player.user_id.as_str(), "4242");
        assert_eq!(player.username.as_deref(), Some("alice_q"));
        assert_eq!(player.auth_date, 1000);
    }

    #[test]
    fn test_wrong_bot_token_is_rejected() {
        let err = verify_init_data(&signed("1000"), "other-token", 3600, 1500).unwrap_err();
        assert_eq!(err, AuthError::InvalidSignature);
    }

    #[test]
    fn test_tampered_field_is_rejected() {
        let tampered = signed("1000").replace("AAH", "BBH");
        let err = verify_init_data(&tampered, TOKEN, 3600, 1500).unwrap_err();
        assert_eq!(err, AuthError::InvalidSignature);
    }

    #[test]
    fn test_stale_init_data_is_rejected() {
        let err = verify_init_data(&signed("1000"), TOKEN, 3600, 1000 + 3601).unwrap_err();
        assert_eq!(err, AuthError::Expired);
    }

    #[test]
    fn test_missing_hash() {
        let err = verify_init_data("auth_date=1&user=%7B%7D", TOKEN, 3600, 2).unwrap_err();
        assert_eq!(err, AuthError::MissingHash);
    }

    #[test]
    fn test_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_header(&headers), Err(AuthError::MissingHeader));

        headers.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(parse_header(&headers), Err(AuthError::InvalidScheme));

        headers.insert("authorization", "tma !!!".parse().unwrap());
        assert_eq!(parse_header(&headers), Err(AuthError::InvalidEncoding));

        let encoded = general_purpose::STANDARD.encode("auth_date=1");
        headers.insert("authorization", format!("tma {}", encoded).parse().unwrap());
        assert_eq!(parse_header(&headers).unwrap(), "auth_date=1");
    }
}
