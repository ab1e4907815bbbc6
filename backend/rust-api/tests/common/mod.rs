#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use quizsprint_api::{
    config::Config,
    create_router,
    middlewares::auth::sign_init_data,
    models::{AnswerId, QuestionId},
    services::AppState,
    utils::time::ManualClock,
};

/// 2026-03-01 12:00:00 UTC
pub const NOON: i64 = 1_772_366_400;
pub const BOT_TOKEN: &str = "12345:integration-test-token";
pub const ADMIN_KEY: &str = "test-admin-key";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub clock: Arc<ManualClock>,
}

pub async fn create_test_app() -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let config = Config {
        telegram_bot_token: BOT_TOKEN.to_string(),
        admin_api_key: Some(ADMIN_KEY.to_string()),
        ..Config::default()
    };
    let clock = Arc::new(ManualClock::starting_at(NOON));
    let state = Arc::new(AppState::in_memory(config, clock.clone()));

    seed_question_bank(&state).await;

    TestApp {
        router: create_router(state.clone()),
        state,
        clock,
    }
}

/// Fifteen questions over three difficulties, enough for a daily quiz and a duel.
async fn seed_question_bank(state: &AppState) {
    let quizzes: Vec<Value> = ["easy", "medium", "hard"]
        .iter()
        .map(|difficulty| {
            let questions: Vec<Value> = (1..=5)
                .map(|n| {
                    json!({
                        "t": format!("{} question {}", difficulty, n),
                        "a": ["right", "wrong", "also wrong"],
                        "c": 0
                    })
                })
                .collect();
            json!({
                "t": format!("Seed {}", difficulty),
                "tags": [format!("difficulty:{}", difficulty)],
                "q": questions
            })
        })
        .collect();

    let batch = json!({
        "batch": { "version": 1, "tags": ["topic:general"] },
        "quizzes": quizzes
    });
    state
        .quiz_importer()
        .import_document(batch, false)
        .await
        .expect("Failed to seed question bank");
}

/// `Authorization` value for a player signed at the test clock's current time.
pub fn auth_header(app: &TestApp, user_id: i64, username: &str) -> String {
    let user = json!({
        "id": user_id,
        "username": username,
        "first_name": username,
        "language_code": "en"
    })
    .to_string();
    let auth_date = (app.state.clock.now()).to_string();
    let raw = sign_init_data(
        &[("auth_date", &auth_date), ("query_id", "AAHtest"), ("user", &user)],
        BOT_TOKEN,
    );
    format!("tma {}", general_purpose::STANDARD.encode(raw))
}

pub async fn send(
    app: &TestApp,
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
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
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, json)
}

pub async fn register(app: &TestApp, user_id: i64, username: &str) -> String {
    let auth = auth_header(app, user_id, username);
    let (status, body) = send(app, "POST", "/api/v1/user/register", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK, "register failed: {}", body);
    auth
}

pub async fn correct_answer(app: &TestApp, question_id: &str) -> AnswerId {
    let id = QuestionId::parse(question_id).unwrap();
    let question = app
        .state
        .repos
        .questions
        .find_by_id(id)
        .await
        .unwrap()
        .expect("question exists");
    question.correct_answer_id().unwrap()
}

pub async fn wrong_answer(app: &TestApp, question_id: &str) -> AnswerId {
    let id = QuestionId::parse(question_id).unwrap();
    let question = app
        .state
        .repos
        .questions
        .find_by_id(id)
        .await
        .unwrap()
        .expect("question exists");
    question
        .answers()
        .iter()
        .find(|answer| !answer.is_correct())
        .map(|answer| answer.id())
        .unwrap()
}
