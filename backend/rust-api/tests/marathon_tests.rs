use axum::http::StatusCode;
use serde_json::{json, Value};

mod common;

use common::{correct_answer, create_test_app, register, send, wrong_answer, TestApp};

fn current_question_id(game: &Value) -> String {
    game["currentQuestion"]["id"]
        .as_str()
        .expect("game has a current question")
        .to_string()
}

async fn answer(app: &TestApp, auth: &str, game_id: &str, game: &Value, correct: bool) -> Value {
    let question_id = current_question_id(game);
    let answer_id = if correct {
        correct_answer(app, &question_id).await
    } else {
        wrong_answer(app, &question_id).await
    };
    let (status, body) = send(
        app,
        "POST",
        &format!("/api/v1/marathon/{}/answer", game_id),
        Some(auth),
        Some(json!({
            "questionId": question_id,
            "answerId": answer_id,
            "timeTakenMs": 2000
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "answer failed: {}", body);
    body
}

#[tokio::test]
async fn test_six_correct_answers_raise_difficulty() {
    let app = create_test_app().await;
    let auth = register(&app, 1001, "marathoner").await;

    let (status, game) = send(&app, "POST", "/api/v1/marathon/start", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK, "start failed: {}", game);
    assert_eq!(game["status"], "in_progress");
    assert_eq!(game["lives"]["current"], 3);
    assert_eq!(game["difficulty"], "beginner");
    let game_id = game["gameId"].as_str().unwrap().to_string();

    let mut game = game;
    let mut last = Value::Null;
    for _ in 0..6 {
        last = answer(&app, &auth, &game_id, &game, true).await;
        game = last["game"].clone();
    }

    assert_eq!(last["isCorrect"], true);
    assert_eq!(last["difficultyChanged"], true);
    assert_eq!(game["currentStreak"], 6);
    assert_eq!(game["maxStreak"], 6);
    assert_eq!(game["difficulty"], "medium");
    assert_eq!(game["lives"]["current"], 3);
}

#[tokio::test]
async fn test_second_marathon_is_a_conflict() {
    let app = create_test_app().await;
    let auth = register(&app, 1002, "twice").await;

    let (status, _) = send(&app, "POST", "/api/v1/marathon/start", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", "/api/v1/marathon/start", Some(&auth), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");
}

#[tokio::test]
async fn test_game_over_continue_and_personal_best() {
    let app = create_test_app().await;
    let auth = register(&app, 1003, "survivor").await;

    let (_, game) = send(&app, "POST", "/api/v1/marathon/start", Some(&auth), None).await;
    let game_id = game["gameId"].as_str().unwrap().to_string();

    let mut game = game;
    for _ in 0..2 {
        game = answer(&app, &auth, &game_id, &game, true).await["game"].clone();
    }
    let mut last = Value::Null;
    for _ in 0..3 {
        last = answer(&app, &auth, &game_id, &game, false).await;
        game = last["game"].clone();
    }
    assert_eq!(last["isGameOver"], true);
    assert_eq!(last["isNewRecord"], true);
    assert_eq!(game["status"], "game_over");
    assert_eq!(game["continueCost"], 200);

    let (status, resumed) = send(
        &app,
        "POST",
        &format!("/api/v1/marathon/{}/continue", game_id),
        Some(&auth),
        Some(json!({ "paymentMethod": "coins" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "continue failed: {}", resumed);
    assert_eq!(resumed["costCoins"], 200);
    assert_eq!(resumed["coinsBalance"], 300);
    assert_eq!(resumed["game"]["status"], "in_progress");
    assert_eq!(resumed["game"]["lives"]["current"], 1);
    assert_eq!(resumed["game"]["continueCount"], 1);
    assert_eq!(resumed["game"]["continueCost"], 400);

    let (status, abandoned) = send(
        &app,
        "POST",
        &format!("/api/v1/marathon/{}/abandon", game_id),
        Some(&auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(abandoned["status"], "abandoned");

    let (_, bests) = send(&app, "GET", "/api/v1/marathon/personal-bests", Some(&auth), None).await;
    let bests = bests["personalBests"].as_array().unwrap();
    assert_eq!(bests.len(), 1);
    assert_eq!(bests[0]["bestStreak"], 2);

    let (status, board) = send(&app, "GET", "/api/v1/marathon/leaderboard?limit=10", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(board["entries"][0]["username"], "survivor");
    assert_eq!(board["entries"][0]["bestStreak"], 2);

    let (_, status_body) = send(&app, "GET", "/api/v1/marathon/status", Some(&auth), None).await;
    assert_eq!(status_body["hasActiveGame"], false);
}

#[tokio::test]
async fn test_other_player_cannot_answer() {
    let app = create_test_app().await;
    let owner = register(&app, 1004, "owner").await;
    let intruder = register(&app, 1005, "intruder").await;

    let (_, game) = send(&app, "POST", "/api/v1/marathon/start", Some(&owner), None).await;
    let game_id = game["gameId"].as_str().unwrap();
    let question_id = current_question_id(&game);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/marathon/{}/answer", game_id),
        Some(&intruder),
        Some(json!({ "questionId": question_id, "timeTakenMs": 1000 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "unauthorized");
}

#[tokio::test]
async fn test_marathon_requires_init_data() {
    let app = create_test_app().await;

    let (status, body) = send(&app, "POST", "/api/v1/marathon/start", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "unauthenticated");
}
