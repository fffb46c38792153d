//! `parley serve`: the plugin behind a small local HTTP server.
//!
//! | Route                                | Purpose                               |
//! |--------------------------------------|---------------------------------------|
//! | `/plugins/parley/*`                  | plugin API (prefix stripped)          |
//! | `GET /metrics`, `/metrics/summary`   | plugin metrics                        |
//! | `POST /hooks/posted`                 | inject a new post                     |
//! | `POST /hooks/updated`                | edit a stored post                    |
//! | `POST /hooks/config`                 | reload the configuration file         |
//! | `POST /hooks/channels`               | register a channel (e.g. a DM)        |
//! | `GET /hooks/channels/{id}/posts`     | read back a channel, replies included |

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result, bail},
    axum::{
        Json, Router,
        body::Body,
        extract::{Path, State},
        http::{HeaderMap, Request, StatusCode, Uri},
        response::{IntoResponse, Response},
        routing::{any, get, post},
    },
    clap::Args,
    parley_common::{Channel, EventContext, Post},
    parley_config::{FileConfigSource, find_config_file},
    parley_plugin::{Error as PluginError, Manifest, Plugin, PluginHooks},
    serde::Deserialize,
    tower_http::trace::TraceLayer,
    tracing::{info, warn},
};

use crate::dev_host::{DevHost, now_millis};

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Configuration file. Defaults to the first `parley.{toml,yaml,yml,json}` found.
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,
    /// Address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,
    /// Port to listen on.
    #[arg(long, default_value_t = 8065)]
    port: u16,
}

#[derive(Clone)]
pub struct AppState {
    plugin: Arc<Plugin>,
    host: Arc<DevHost>,
}

impl AppState {
    #[must_use]
    pub fn new(plugin: Arc<Plugin>, host: Arc<DevHost>) -> Self {
        Self { plugin, host }
    }
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let Some(config_path) = args.config.or_else(find_config_file) else {
        bail!("no configuration file found; pass --config or run `parley config init`");
    };

    let host = Arc::new(DevHost::new());
    let plugin = Arc::new(Plugin::new(
        Manifest::current(),
        Arc::clone(&host) as Arc<dyn parley_common::HostApi>,
        Arc::new(FileConfigSource::new(&config_path)),
    ));
    plugin
        .on_activate()
        .await
        .with_context(|| format!("failed to activate with {}", config_path.display()))?;

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.bind, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, config = %config_path.display(), "development host listening");

    axum::serve(listener, router(AppState::new(Arc::clone(&plugin), host)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    plugin.on_deactivate().await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/plugins/parley/{*rest}", any(plugin_http))
        .route("/metrics", get(plugin_metrics))
        .route("/metrics/summary", get(plugin_metrics))
        .route("/hooks/posted", post(hook_posted))
        .route("/hooks/updated", post(hook_updated))
        .route("/hooks/config", post(hook_config))
        .route("/hooks/channels", post(hook_channel))
        .route("/hooks/channels/{channel_id}/posts", get(channel_posts))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn event_context(headers: &HeaderMap) -> EventContext {
    match headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()) {
        Some(id) if !id.is_empty() => EventContext::new(id),
        _ => EventContext::detached(),
    }
}

// ── Plugin surfaces ──────────────────────────────────────────────────────────

async fn plugin_http(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    mut req: Request<Body>,
) -> Response {
    let path_and_query = match req.uri().query() {
        Some(query) => format!("/{rest}?{query}"),
        None => format!("/{rest}"),
    };
    match path_and_query.parse::<Uri>() {
        Ok(uri) => *req.uri_mut() = uri,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("invalid plugin path: {e}")).into_response();
        },
    }
    let ctx = event_context(req.headers());
    state.plugin.serve_http(&ctx, req).await
}

async fn plugin_metrics(State(state): State<AppState>, req: Request<Body>) -> Response {
    let ctx = event_context(req.headers());
    state.plugin.serve_metrics(&ctx, req).await
}

// ── Event injection ──────────────────────────────────────────────────────────

async fn hook_posted(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(post): Json<Post>,
) -> impl IntoResponse {
    let post = state.host.accept(post);
    let post_id = post.id.clone();
    state
        .plugin
        .message_has_been_posted(&event_context(&headers), post)
        .await;
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "post_id": post_id })),
    )
}

#[derive(Debug, Deserialize)]
struct EditRequest {
    post_id: String,
    message: String,
}

async fn hook_updated(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(edit): Json<EditRequest>,
) -> Response {
    let Some(old) = state.host.post(&edit.post_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("post {} not found", edit.post_id) })),
        )
            .into_response();
    };
    let new = state.host.accept(Post {
        message: edit.message,
        update_at: now_millis(),
        ..old.clone()
    });
    let post_id = new.id.clone();
    state
        .plugin
        .message_has_been_updated(&event_context(&headers), old, new)
        .await;
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "post_id": post_id })),
    )
        .into_response()
}

async fn hook_config(State(state): State<AppState>) -> Response {
    match state.plugin.on_configuration_change().await {
        Ok(()) => {
            let revision = state.plugin.service().map(|s| s.config().revision());
            Json(serde_json::json!({ "revision": revision })).into_response()
        },
        Err(e) => {
            let status = match &e {
                PluginError::NotActive => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            (
                status,
                Json(serde_json::json!({ "error": e.to_string(), "kind": e.kind() })),
            )
                .into_response()
        },
    }
}

async fn hook_channel(State(state): State<AppState>, Json(channel): Json<Channel>) -> StatusCode {
    state.host.add_channel(channel);
    StatusCode::NO_CONTENT
}

async fn channel_posts(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Json<Vec<Post>> {
    Json(state.host.channel_posts(&channel_id))
}
