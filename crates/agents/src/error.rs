use std::{error::Error as StdError, time::Duration};

use {parley_config::ConfigError, parley_httpservice::UpstreamError};

/// Activation failed; nothing was published.
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build upstream clients: {0}")]
    Clients(#[from] UpstreamError),

    #[error("failed to initialize metrics: {0}")]
    Metrics(#[from] parley_metrics::error::Error),

    #[error("failed to ensure bot account @{bot}: {source}")]
    Bot {
        bot: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl ActivationError {
    #[must_use]
    pub fn bot(bot: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Bot {
            bot: bot.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeactivationError {
    #[error("{remaining} run(s) still in flight after {}ms", waited.as_millis())]
    Timeout { remaining: usize, waited: Duration },
}

/// Failure of an API-facing command.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("only the user who started the run may do that")]
    Forbidden,

    #[error("service is shutting down")]
    NotAccepting,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl ServiceError {
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    #[must_use]
    pub fn host(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::External {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Short label for API error bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden => "forbidden",
            Self::NotAccepting => "not_accepting",
            Self::Config(_) => "invalid_config",
            Self::External { .. } => "host",
        }
    }
}

/// Why a background run ended without a reply from the model.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The snapshot the run was admitted with cannot serve it.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Host {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl RunError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    #[must_use]
    pub fn host(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Host {
            context: context.into(),
            source: source.into(),
        }
    }
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
