use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    parley_agents::ServiceError,
    tracing::warn,
};

/// Error body returned by every route: `{ "error": ..., "kind": ... }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Forbidden => StatusCode::FORBIDDEN,
            ServiceError::NotAccepting => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::External { .. } => {
                warn!(error = %err, "host call failed while serving API request");
                StatusCode::BAD_GATEWAY
            },
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "error": self.message,
                "kind": self.kind,
            })),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
