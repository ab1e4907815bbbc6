use axum::http::StatusCode;
use serde_json::{json, Value};

mod common;

use common::{auth_header, correct_answer, create_test_app, register, send, wrong_answer, TestApp};

const DAY: i64 = 86_400;

/// Plays a whole attempt; `correct` decides how many of the ten answers are right.
async fn play_attempt(app: &TestApp, auth: &str, game: Value, correct: usize) -> Value {
    let game_id = game["gameId"].as_str().unwrap().to_string();
    let mut game = game;
    let mut last = Value::Null;
    for index in 0..10 {
        let question_id = game["currentQuestion"]["id"].as_str().unwrap().to_string();
        let answer_id = if index < correct {
            correct_answer(app, &question_id).await
        } else {
            wrong_answer(app, &question_id).await
        };
        let (status, body) = send(
            app,
            "POST",
            &format!("/api/v1/daily-challenge/{}/answer", game_id),
            Some(auth),
            Some(json!({
                "questionId": question_id,
                "answerId": answer_id,
                "timeTakenMs": 3000
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "answer failed: {}", body);
        game = body["game"].clone();
        last = body;
    }
    assert_eq!(last["isCompleted"], true);
    game
}

#[tokio::test]
async fn test_full_attempt_earns_diamond_chest_once() {
    let app = create_test_app().await;
    let auth = register(&app, 2001, "daily_ace").await;

    let (status, game) = send(&app, "POST", "/api/v1/daily-challenge/start", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK, "start failed: {}", game);
    assert_eq!(game["attemptNumber"], 1);
    assert_eq!(game["totalQuestions"], 10);
    assert!(game["baseScore"].is_null());

    let game = play_attempt(&app, &auth, game, 10).await;
    assert_eq!(game["status"], "completed");
    assert_eq!(game["baseScore"], 100);
    assert_eq!(game["chest"]["chestType"], "diamond");
    assert_eq!(game["streak"]["currentStreak"], 1);

    let game_id = game["gameId"].as_str().unwrap();
    let uri = format!("/api/v1/daily-challenge/{}/chest/open", game_id);
    let (status, first) = send(&app, "POST", &uri, Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["chestType"], "diamond");
    assert_eq!(first["coins"], 200);
    assert_eq!(first["newlyOpened"], true);
    assert_eq!(first["coinsBalance"], 700);

    let (_, second) = send(&app, "POST", &uri, Some(&auth), None).await;
    assert_eq!(second["chestType"], "diamond");
    assert_eq!(second["coins"], 200);
    assert_eq!(second["newlyOpened"], false);
    assert_eq!(second["coinsBalance"], 700);
}

#[tokio::test]
async fn test_answers_must_follow_question_order() {
    let app = create_test_app().await;
    let auth = register(&app, 2002, "skipper").await;

    let (_, game) = send(&app, "POST", "/api/v1/daily-challenge/start", Some(&auth), None).await;
    let game_id = game["gameId"].as_str().unwrap();
    let current = game["currentQuestion"]["id"].as_str().unwrap().to_string();

    // any seeded question other than the current one
    let other = app
        .state
        .repos
        .questions
        .find_random_questions(&quizsprint_api::models::QuestionFilter::new(), 15)
        .await
        .unwrap()
        .into_iter()
        .find(|question| question.id().to_string() != current)
        .unwrap();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/daily-challenge/{}/answer", game_id),
        Some(&auth),
        Some(json!({
            "questionId": other.id(),
            "answerId": other.correct_answer_id(),
            "timeTakenMs": 1000
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_input");
}

#[tokio::test]
async fn test_retry_and_leaderboard_keep_best_attempt() {
    let app = create_test_app().await;
    let auth = register(&app, 2003, "retrier").await;
    let rival = register(&app, 2004, "rival").await;

    let (_, game) = send(&app, "POST", "/api/v1/daily-challenge/start", Some(&auth), None).await;
    let first = play_attempt(&app, &auth, game, 4).await;
    assert_eq!(first["baseScore"], 40);

    let (status, body) = send(&app, "POST", "/api/v1/daily-challenge/start", Some(&auth), None).await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);

    let (status, retry) = send(
        &app,
        "POST",
        &format!("/api/v1/daily-challenge/{}/retry", first["gameId"].as_str().unwrap()),
        Some(&auth),
        Some(json!({ "paymentMethod": "coins" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "retry failed: {}", retry);
    assert_eq!(retry["attemptNumber"], 2);
    let second = play_attempt(&app, &auth, retry, 9).await;
    assert_eq!(second["baseScore"], 90);

    let (_, rival_game) = send(&app, "POST", "/api/v1/daily-challenge/start", Some(&rival), None).await;
    play_attempt(&app, &rival, rival_game, 7).await;

    let (status, board) = send(
        &app,
        "GET",
        "/api/v1/daily-challenge/leaderboard?limit=10",
        Some(&auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = board["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["username"], "retrier");
    assert_eq!(entries[0]["baseScore"], 90);
    assert_eq!(entries[1]["baseScore"], 70);
    assert_eq!(board["playerRank"], 1);

    let (_, me) = send(&app, "GET", "/api/v1/user/me", Some(&auth), None).await;
    assert_eq!(me["coins"], 400);
}

#[tokio::test]
async fn test_streak_continues_on_consecutive_days() {
    let app = create_test_app().await;
    register(&app, 2005, "regular").await;

    let auth = auth_header(&app, 2005, "regular");
    let (_, game) = send(&app, "POST", "/api/v1/daily-challenge/start", Some(&auth), None).await;
    play_attempt(&app, &auth, game, 5).await;

    app.clock.advance(DAY);
    let auth = auth_header(&app, 2005, "regular");
    let (_, game) = send(&app, "POST", "/api/v1/daily-challenge/start", Some(&auth), None).await;
    let game = play_attempt(&app, &auth, game, 5).await;
    assert_eq!(game["streak"]["currentStreak"], 2);

    app.clock.advance(2 * DAY);
    let auth = auth_header(&app, 2005, "regular");
    let (status, streak) = send(&app, "GET", "/api/v1/daily-challenge/streak", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(streak["currentStreak"], 0);
    assert_eq!(streak["bestStreak"], 2);
}
