//! HTTP request metrics middleware.

use std::time::Instant;

use {
    axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response},
    parley_metrics::Metrics,
};

/// Records `parley_http_requests_total` and
/// `parley_http_request_duration_seconds` by method, normalized path and status.
pub async fn http_metrics_middleware(
    State(metrics): State<Metrics>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    metrics.record_http_request(&method, &path, response.status().as_u16(), start.elapsed());
    response
}

/// Replace dynamic segments with `{id}` so labels stay low-cardinality.
fn normalize_path(path: &str) -> String {
    let normalized = path
        .split('/')
        .map(|segment| if is_dynamic(segment) { "{id}" } else { segment })
        .collect::<Vec<_>>()
        .join("/");

    let mut result = normalized;
    while result.contains("//") {
        result = result.replace("//", "/");
    }
    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }
    if result.is_empty() {
        "/".to_string()
    } else {
        result
    }
}

fn is_dynamic(segment: &str) -> bool {
    (!segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()))
        || looks_like_uuid(segment)
        || looks_like_post_id(segment)
}

/// 8-4-4-4-12 hex with dashes, or 32 hex chars.
fn looks_like_uuid(s: &str) -> bool {
    match s.len() {
        36 => {
            let parts: Vec<&str> = s.split('-').collect();
            parts.iter().map(|p| p.len()).eq([8, 4, 4, 4, 12])
                && s.chars().filter(|c| *c != '-').all(|c| c.is_ascii_hexdigit())
        },
        32 => s.chars().all(|c| c.is_ascii_hexdigit()),
        _ => false,
    }
}

/// Chat platform ids: 26 lowercase base32 characters.
fn looks_like_post_id(s: &str) -> bool {
    s.len() == 26
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && s.chars().any(|c| c.is_ascii_digit())
}
