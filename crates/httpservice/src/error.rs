use std::time::Duration;

/// Classified failure of one outbound call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream call timed out after {}ms", after.as_millis())]
    Timeout { after: Duration },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    /// Refused by the untrusted fetch policy (private address, redirect loop, ...).
    #[error("blocked: {0}")]
    Blocked(String),

    #[error("upstream call cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("failed to build http client: {0}")]
    Client(String),
}

impl UpstreamError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport(_) | Self::RateLimited { .. } => true,
            Self::Upstream { status, .. } => *status >= 500,
            Self::Blocked(_)
            | Self::Cancelled
            | Self::InvalidRequest(_)
            | Self::InvalidResponse(_)
            | Self::Client(_) => false,
        }
    }

    /// Delay requested by the upstream, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Transport(_) => "transport",
            Self::Upstream { status, .. } if *status >= 500 => "upstream_5xx",
            Self::Upstream { .. } => "upstream_4xx",
            Self::RateLimited { .. } => "rate_limited",
            Self::Blocked(_) => "blocked",
            Self::Cancelled => "cancelled",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Client(_) => "client",
        }
    }

    pub(crate) fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout { after: timeout }
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, UpstreamError>;
