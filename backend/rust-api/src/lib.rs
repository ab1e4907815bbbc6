use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = cors_layer(&app_state.config.cors_origins);

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        // The socket authenticates itself from the query string
        .route("/ws/duel/{match_id}", get(handlers::duel_ws::duel_socket))
        .nest("/api/v1", api_routes(app_state.clone()))
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn api_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    let public_routes = Router::new()
        .route("/quiz", get(handlers::quiz::list_quizzes))
        .route("/quiz/{id}", get(handlers::quiz::get_quiz))
        .route(
            "/quiz/{id}/leaderboard",
            get(handlers::quiz::quiz_leaderboard),
        )
        .route("/leaderboard", get(handlers::quiz::global_leaderboard))
        .route(
            "/categories",
            get(handlers::quiz::list_categories).merge(
                post(handlers::quiz::create_category).route_layer(
                    middleware::from_fn_with_state(
                        app_state.clone(),
                        middlewares::auth::admin_key_middleware,
                    ),
                ),
            ),
        )
        .route(
            "/marathon/leaderboard",
            get(handlers::marathon::leaderboard),
        )
        .route("/duel/leaderboard", get(handlers::duel::leaderboard));

    let protected_routes = Router::new()
        .merge(user_routes())
        .merge(quiz_session_routes())
        .nest("/marathon", marathon_routes())
        .nest("/daily-challenge", daily_routes())
        .nest("/duel", duel_routes())
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::auth::telegram_auth_middleware,
        ));

    let admin_routes = Router::new()
        .route(
            "/admin/quizzes/import",
            post(handlers::admin::import_quizzes),
        )
        .route(
            "/admin/quizzes/export",
            get(handlers::admin::export_quizzes),
        )
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::admin_key_middleware,
        ));

    public_routes.merge(protected_routes).merge(admin_routes)
}

fn user_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/user/register", post(handlers::users::register))
        .route("/user/me", get(handlers::users::me))
        .route(
            "/user/by-username/{username}",
            get(handlers::users::get_by_username),
        )
        .route(
            "/user/{id}",
            get(handlers::users::get_user).put(handlers::users::update_user),
        )
}

fn quiz_session_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/quiz/{id}/start", post(handlers::quiz::start))
        .route(
            "/quiz/session/{session_id}",
            get(handlers::quiz::get_session).delete(handlers::quiz::abandon_session),
        )
        .route(
            "/quiz/session/{session_id}/answer",
            post(handlers::quiz::submit_answer),
        )
}

fn marathon_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start", post(handlers::marathon::start))
        .route("/status", get(handlers::marathon::status))
        .route(
            "/personal-bests",
            get(handlers::marathon::personal_bests),
        )
        .route("/{game_id}/answer", post(handlers::marathon::submit_answer))
        .route("/{game_id}/hint", post(handlers::marathon::use_hint))
        .route("/{game_id}/bonus", post(handlers::marathon::use_bonus))
        .route(
            "/{game_id}/continue",
            post(handlers::marathon::continue_game),
        )
        .route("/{game_id}/abandon", post(handlers::marathon::abandon))
}

fn daily_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start", post(handlers::daily_challenge::start))
        .route("/status", get(handlers::daily_challenge::status))
        .route(
            "/leaderboard",
            get(handlers::daily_challenge::leaderboard),
        )
        .route("/streak", get(handlers::daily_challenge::streak))
        .route(
            "/{game_id}/answer",
            post(handlers::daily_challenge::submit_answer),
        )
        .route("/{game_id}/retry", post(handlers::daily_challenge::retry))
        .route(
            "/{game_id}/chest/open",
            post(handlers::daily_challenge::open_chest),
        )
}

fn duel_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/queue/join", post(handlers::duel::join_queue))
        .route("/queue/leave", delete(handlers::duel::leave_queue))
        .route("/challenge", post(handlers::duel::send_challenge))
        .route(
            "/challenge/link",
            post(handlers::duel::create_challenge_link),
        )
        .route(
            "/challenge/{id}/respond",
            post(handlers::duel::respond_challenge),
        )
        .route("/status", get(handlers::duel::status))
        .route("/history", get(handlers::duel::history))
        .route("/leaderboard/me", get(handlers::duel::my_leaderboard))
        .route("/referrals", get(handlers::duel::referrals))
        .route(
            "/referrals/claim",
            post(handlers::duel::claim_referral_reward),
        )
        .route(
            "/match/{id}/rematch",
            post(handlers::duel::request_rematch),
        )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(middlewares::auth::ADMIN_KEY_HEADER),
        ]);

    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
