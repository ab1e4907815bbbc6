use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;

use common::{create_test_app, TestApp, ADMIN_KEY};

async fn admin(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-admin-key", ADMIN_KEY);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn verbose_quiz() -> Value {
    json!({
        "title": "Rust Ownership",
        "description": "Borrowing basics",
        "timeLimit": 90,
        "passingScore": 60,
        "tags": ["language:rust", "difficulty:medium"],
        "questions": [
            {
                "text": "Who owns a moved value?",
                "points": 20,
                "answers": [
                    { "text": "The new binding", "isCorrect": true },
                    { "text": "Both bindings", "isCorrect": false }
                ]
            },
            {
                "text": "Can you hold two &mut at once?",
                "points": 10,
                "answers": [
                    { "text": "Yes", "isCorrect": false },
                    { "text": "No", "isCorrect": true }
                ]
            }
        ]
    })
}

#[tokio::test]
async fn test_import_verbose_quiz_then_export_it() {
    let app = create_test_app().await;

    let (status, report) = admin(&app, "POST", "/api/v1/admin/quizzes/import", Some(verbose_quiz())).await;
    assert_eq!(status, StatusCode::CREATED, "import failed: {}", report);
    assert_eq!(report["format"], "verbose");
    assert_eq!(report["imported"][0]["questionCount"], 2);
    let quiz_id = report["imported"][0]["id"].as_str().unwrap().to_string();

    let (status, exported) = admin(
        &app,
        "GET",
        &format!("/api/v1/admin/quizzes/export?id={}", quiz_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(exported["t"], "Rust Ownership");
    assert_eq!(exported["cat"], "programming");
    assert_eq!(exported["l"], 90);
    assert_eq!(exported["p"], 60);
    assert_eq!(exported["q"][1]["c"], 1);
    assert_eq!(exported["q"][0]["p"], 20);
    assert!(exported["q"][1].get("p").is_none());

    // same title again is skipped
    let (status, again) = admin(&app, "POST", "/api/v1/admin/quizzes/import", Some(verbose_quiz())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["skipped"][0], "Rust Ownership");
}

#[tokio::test]
async fn test_dry_run_saves_nothing() {
    let app = create_test_app().await;

    let (status, report) = admin(
        &app,
        "POST",
        "/api/v1/admin/quizzes/import?dryRun=true",
        Some(json!({ "t": "Capitals", "q": [{ "t": "Capital of France?", "a": ["Paris", "Rome"], "c": 0 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", report);
    assert_eq!(report["format"], "compact");
    assert_eq!(report["dryRun"], true);

    let (_, batch) = admin(&app, "GET", "/api/v1/admin/quizzes/export?batch=true", None).await;
    let titles: Vec<&str> = batch["quizzes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|quiz| quiz["t"].as_str())
        .collect();
    assert!(!titles.contains(&"Capitals"));
    assert_eq!(batch["batch"]["version"], 1);
}

#[tokio::test]
async fn test_invalid_quiz_is_rejected_with_reason() {
    let app = create_test_app().await;

    let (status, body) = admin(
        &app,
        "POST",
        "/api/v1/admin/quizzes/import",
        Some(json!({ "t": "Broken", "q": [{ "t": "Pick one", "a": ["only answer"], "c": 0 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("question 1"));

    let (status, _) = admin(&app, "POST", "/api/v1/admin/quizzes/import", Some(json!({ "unknown": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_routes_require_key() {
    let app = create_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/v1/admin/quizzes/export")
                .header("x-admin-key", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
