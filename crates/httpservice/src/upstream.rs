//! Outbound request and response values.

use std::time::Duration;

use {
    http::{HeaderMap, HeaderValue, Method, header},
    serde::de::DeserializeOwned,
};

use crate::error::{Result, UpstreamError};

/// Upper bound on error bodies kept for diagnostics.
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// Endpoint name, for logs and metrics.
    pub endpoint: String,
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    /// Per-request timeout; the client timeout applies when unset or larger.
    pub timeout: Option<Duration>,
}

impl UpstreamRequest {
    #[must_use]
    pub fn post_json(
        endpoint: impl Into<String>,
        url: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            url: url.into(),
            method: Method::POST,
            headers: HeaderMap::new(),
            body: Some(body),
            timeout: None,
        }
    }

    #[must_use]
    pub fn get(endpoint: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            url: url.into(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Adds an `Authorization: Bearer` header. Invalid header bytes are rejected.
    pub fn with_bearer(mut self, token: &str) -> Result<Self> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| UpstreamError::InvalidRequest("api key is not a valid header".into()))?;
        value.set_sensitive(true);
        self.headers.insert(header::AUTHORIZATION, value);
        Ok(self)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
    pub elapsed: Duration,
}

impl UpstreamResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| UpstreamError::InvalidResponse(e.to_string()))
    }
}

/// Map a non-success status to its classified error.
pub(crate) fn status_error(status: u16, headers: &HeaderMap, body: &str) -> UpstreamError {
    if status == 429 {
        return UpstreamError::RateLimited {
            retry_after: retry_after(headers),
        };
    }
    UpstreamError::Upstream {
        status,
        body: truncate_at_char_boundary(body.trim(), MAX_ERROR_BODY_CHARS),
    }
}

/// `Retry-After` (delta seconds) or the non-standard `retry-after-ms`.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };
    header_u64("retry-after-ms")
        .map(Duration::from_millis)
        .or_else(|| header_u64(header::RETRY_AFTER.as_str()).map(Duration::from_secs))
}

/// Truncate a string at a char boundary, not mid-UTF-8.
pub(crate) fn truncate_at_char_boundary(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.into();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_reads_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(
            status_error(429, &headers, ""),
            UpstreamError::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );

        headers.insert("retry-after-ms", HeaderValue::from_static("250"));
        assert_eq!(
            status_error(429, &headers, "").retry_after(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn error_bodies_are_truncated() {
        let body = "é".repeat(400);
        match status_error(500, &HeaderMap::new(), &body) {
            UpstreamError::Upstream { status, body } => {
                assert_eq!(status, 500);
                assert!(body.len() <= MAX_ERROR_BODY_CHARS);
                assert!(body.chars().all(|c| c == 'é'));
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bearer_header_is_sensitive() {
        let req = UpstreamRequest::get("e", "https://x.example")
            .with_bearer("sk-1")
            .unwrap();
        let value = req.headers.get(header::AUTHORIZATION).unwrap();
        assert!(value.is_sensitive());
        assert!(UpstreamRequest::get("e", "u").with_bearer("bad\nkey").is_err());
    }
}
