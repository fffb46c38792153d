//! Metrics routes for Prometheus scraping and dashboards.

use {
    axum::{
        Json,
        extract::State,
        http::header,
        response::IntoResponse,
    },
    parley_metrics::Metrics,
};

/// Prometheus text exposition. Unauthenticated so scrapers can reach it.
pub async fn prometheus_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics.render(),
    )
}

/// Structured snapshot with per-category aggregates.
pub async fn summary_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    Json(metrics.snapshot())
}
