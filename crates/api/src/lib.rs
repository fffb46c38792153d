//! The plugin's HTTP surface.
//!
//! Two routers: the API under `/api/v1` (caller identity required) and the
//! metrics routes. Both only hold `Arc` handles, so they can be cloned into
//! as many host requests as arrive concurrently.

pub mod auth;
pub mod error;
pub mod metrics_middleware;
pub mod metrics_routes;
pub mod routes;

use std::sync::Arc;

use {
    axum::{
        Router, middleware,
        routing::{get, post},
    },
    parley_agents::AgentsService,
};

pub use {
    auth::{Requester, USER_ID_HEADER},
    error::ApiError,
};

/// Routes served through the host's plugin HTTP hook.
pub fn api_router(service: Arc<AgentsService>) -> Router {
    let metrics = service.metrics().clone();
    Router::new()
        .route("/api/v1/bots", get(routes::list_bots))
        .route("/api/v1/status", get(routes::status))
        .route("/api/v1/posts/{post_id}/stop", post(routes::stop))
        .route("/api/v1/posts/{post_id}/regenerate", post(routes::regenerate))
        .route("/api/v1/config/validate", post(routes::validate_config))
        .fallback(routes::not_found)
        .with_state(service)
        .layer(middleware::from_fn_with_state(
            metrics,
            metrics_middleware::http_metrics_middleware,
        ))
}

/// Routes served through the host's metrics hook.
pub fn metrics_router(metrics: parley_metrics::Metrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_routes::prometheus_handler))
        .route("/metrics/summary", get(metrics_routes::summary_handler))
        .with_state(metrics.clone())
        .layer(middleware::from_fn_with_state(
            metrics,
            metrics_middleware::http_metrics_middleware,
        ))
}
