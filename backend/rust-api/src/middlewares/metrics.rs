use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Records request count and latency per normalised route
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Replaces identifiers in a path with `{id}` to keep label cardinality bounded.
/// Player ids are numeric, match/game ids are UUIDs and challenge tokens are 8 hex chars.
fn normalize_path(path: &str) -> String {
    let mut after_username = false;
    path.split('/')
        .map(|segment| {
            let dynamic = after_username
                || is_uuid_like(segment)
                || is_numeric_id(segment)
                || is_short_token(segment);
            after_username = segment == "by-username";
            if dynamic {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_uuid_like(s: &str) -> bool {
    s.len() == 36 && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

fn is_numeric_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn is_short_token(s: &str) -> bool {
    let s = s.strip_prefix("duel_").unwrap_or(s);
    s.len() == 8
        && s.chars().all(|c| c.is_ascii_hexdigit())
        && s.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path("/api/v1/marathon/550e8400-e29b-41d4-a716-446655440000/answer"),
            "/api/v1/marathon/{id}/answer"
        );
        assert_eq!(normalize_path("/api/v1/user/123456"), "/api/v1/user/{id}");
        assert_eq!(
            normalize_path("/api/v1/user/by-username/alice"),
            "/api/v1/user/by-username/{id}"
        );
        assert_eq!(
            normalize_path("/api/v1/duel/challenge/1a2b3c4d/respond"),
            "/api/v1/duel/challenge/{id}/respond"
        );
        assert_eq!(
            normalize_path("/api/v1/duel/challenge/duel_1a2b3c4d/respond"),
            "/api/v1/duel/challenge/{id}/respond"
        );
        assert_eq!(normalize_path("/api/v1/marathon/status"), "/api/v1/marathon/status");
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn test_is_uuid_like() {
        assert!(is_uuid_like("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_uuid_like("not-a-uuid"));
        assert!(!is_uuid_like("12345"));
    }

    #[test]
    fn test_is_numeric_id() {
        assert!(is_numeric_id("123"));
        assert!(!is_numeric_id("abc"));
        assert!(!is_numeric_id(""));
    }

    #[test]
    fn test_short_tokens_need_a_digit() {
        assert!(is_short_token("0badcafe"));
        assert!(!is_short_token("deadbeef"));
        assert!(!is_short_token("status"));
    }
}
