use axum::http::StatusCode;
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;

mod common;

use common::{auth_header, create_test_app, register, send};

#[tokio::test]
async fn test_register_creates_profile_with_starting_balance() {
    let app = create_test_app().await;
    let auth = auth_header(&app, 5001, "newcomer");

    let (status, profile) = send(&app, "POST", "/api/v1/user/register", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["id"], "5001");
    assert_eq!(profile["username"], "newcomer");
    assert_eq!(profile["telegramUsername"], "newcomer");
    assert_eq!(profile["coins"], 500);
    assert_eq!(profile["tickets"], 5);

    // registering again is an upsert
    let (status, again) = send(&app, "POST", "/api/v1/user/register", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["createdAt"], profile["createdAt"]);
}

#[tokio::test]
async fn test_profile_can_only_be_edited_by_its_owner() {
    let app = create_test_app().await;
    let owner = register(&app, 5002, "profile_owner").await;
    let other = register(&app, 5003, "someone_else").await;

    let (status, updated) = send(
        &app,
        "PUT",
        "/api/v1/user/5002",
        Some(&owner),
        Some(json!({ "username": "Quiz Master", "avatarUrl": "https://example.com/a.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "update failed: {}", updated);
    assert_eq!(updated["username"], "Quiz Master");

    let (status, body) = send(
        &app,
        "PUT",
        "/api/v1/user/5002",
        Some(&other),
        Some(json!({ "username": "hijacked" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "unauthorized");

    let (status, body) = send(
        &app,
        "PUT",
        "/api/v1/user/5002",
        Some(&owner),
        Some(json!({ "email": "not-an-email" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
}

#[tokio::test]
async fn test_lookup_by_platform_username() {
    let app = create_test_app().await;
    let auth = register(&app, 5004, "findable").await;

    let (status, user) = send(
        &app,
        "GET",
        "/api/v1/user/by-username/@findable",
        Some(&auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["id"], "5004");
    assert!(user.get("coins").is_none());

    let (status, _) = send(&app, "GET", "/api/v1/user/404404", Some(&auth), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stale_or_forged_init_data_is_rejected() {
    let app = create_test_app().await;
    let auth = auth_header(&app, 5005, "latecomer");

    app.clock.advance(3601);
    let (status, body) = send(&app, "GET", "/api/v1/user/me", Some(&auth), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "unauthenticated");

    let forged = format!(
        "tma {}",
        general_purpose::STANDARD.encode("auth_date=1&user=%7B%22id%22%3A1%7D&hash=00")
    );
    let (status, _) = send(&app, "GET", "/api/v1/user/me", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/api/v1/user/me", Some("Bearer abc"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_reports_in_memory_storage() {
    let app = create_test_app().await;

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "quizsprint-api");
}
