//! Caller identity.
//!
//! The host authenticates users before forwarding requests and passes the
//! user id in [`USER_ID_HEADER`]. Requests without it never reach a handler.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "parley-user-id";

/// The authenticated user making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Requester {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
            .ok_or_else(|| ApiError::unauthorized("missing Parley-User-Id header"))
    }
}
