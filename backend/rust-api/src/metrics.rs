use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Storage Metrics
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of storage operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Storage operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Game Metrics
    pub static ref MARATHON_GAMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "marathon_games_total",
        "Marathon games by lifecycle stage",
        &["stage"]
    )
    .unwrap();

    pub static ref ANSWERS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_submitted_total",
        "Total number of answers submitted",
        &["mode", "correct"]
    )
    .unwrap();

    pub static ref DAILY_CHALLENGES_COMPLETED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "daily_challenges_completed_total",
        "Completed daily challenge attempts",
        &["attempt", "chest"]
    )
    .unwrap();

    pub static ref DUEL_MATCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "duel_matches_total",
        "Duel matches by lifecycle stage",
        &["stage"]
    )
    .unwrap();

    pub static ref MATCHMAKING_QUEUE_SIZE: IntGauge = register_int_gauge!(
        "matchmaking_queue_size",
        "Players currently waiting for a duel"
    )
    .unwrap();

    pub static ref DUEL_SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "duel_sessions_active",
        "Open duel WebSocket sessions"
    )
    .unwrap();

    pub static ref DOMAIN_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "domain_events_total",
        "Domain events published",
        &["event_type"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track storage operation with metrics
pub async fn track_db_operation<F, T, E>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

pub fn record_answer(mode: &str, correct: bool) {
    ANSWERS_SUBMITTED_TOTAL
        .with_label_values(&[mode, if correct { "true" } else { "false" }])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .get();
        let _ = MATCHMAKING_QUEUE_SIZE.get();
    }

    #[test]
    fn test_render_metrics() {
        record_answer("marathon", true);
        DOMAIN_EVENTS_TOTAL.with_label_values(&["life_lost"]).inc();

        let output = render_metrics().unwrap();
        assert!(output.contains("answers_submitted_total"));
        assert!(output.contains("domain_events_total"));
    }

    #[tokio::test]
    async fn test_track_db_operation_passes_result_through() {
        let ok: Result<u32, String> = track_db_operation("find", "tests", async { Ok(3) }).await;
        assert_eq!(ok, Ok(3));
        let err: Result<u32, String> =
            track_db_operation("find", "tests", async { Err("down".to_string()) }).await;
        assert!(err.is_err());
    }
}
