//! `/api/v1` handlers.

use std::sync::Arc;

use {
    axum::{
        Json,
        body::Bytes,
        extract::{Path, Query, State, rejection::QueryRejection},
        http::{HeaderMap, StatusCode, header},
        response::IntoResponse,
    },
    parley_agents::{AgentsService, BotInfo, ServiceStatus},
    parley_config::{ConfigFormat, Diagnostic, validate_str},
    serde::{Deserialize, Serialize},
    tracing::info,
};

use crate::{
    auth::Requester,
    error::{ApiError, Result},
};

pub async fn list_bots(
    State(service): State<Arc<AgentsService>>,
    _requester: Requester,
) -> Json<Vec<BotInfo>> {
    Json(service.list_bots())
}

pub async fn status(
    State(service): State<Arc<AgentsService>>,
    _requester: Requester,
) -> Json<ServiceStatus> {
    Json(service.status())
}

#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub post_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
}

pub async fn stop(
    State(service): State<Arc<AgentsService>>,
    Requester(user_id): Requester,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse> {
    service.stop(&post_id, &user_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            post_id,
            generation: None,
        }),
    ))
}

pub async fn regenerate(
    State(service): State<Arc<AgentsService>>,
    Requester(user_id): Requester,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse> {
    let generation = service.regenerate(&post_id, &user_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            post_id,
            generation: Some(generation),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ValidateParams {
    format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub format: &'static str,
    pub summary: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Check a configuration document without publishing it. The format comes
/// from `?format=`, then the content type, then defaults to TOML.
pub async fn validate_config(
    Requester(user_id): Requester,
    params: std::result::Result<Query<ValidateParams>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ValidateResponse>> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let format = match params.format.as_deref() {
        Some(ext) => {
            ConfigFormat::from_extension(ext).map_err(|e| ApiError::bad_request(e.to_string()))?
        },
        None => format_from_content_type(&headers),
    };
    let raw = std::str::from_utf8(&body)
        .map_err(|_| ApiError::bad_request("configuration must be UTF-8 text"))?;

    let result = validate_str(raw, format);
    info!(
        %user_id,
        %format,
        errors = result.errors().count(),
        "configuration validated"
    );
    Ok(Json(ValidateResponse {
        valid: !result.has_errors(),
        format: format.as_str(),
        summary: result.summary(),
        diagnostics: result.diagnostics,
    }))
}

fn format_from_content_type(headers: &HeaderMap) -> ConfigFormat {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if content_type.contains("json") {
        ConfigFormat::Json
    } else if content_type.contains("yaml") {
        ConfigFormat::Yaml
    } else {
        ConfigFormat::Toml
    }
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("no such route")
}
