use std::{error::Error as StdError, path::PathBuf};

use crate::validate::ValidationResult;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The document parsed but failed validation; the previous snapshot stays active.
    #[error("configuration rejected: {}", .0.summary())]
    Invalid(ValidationResult),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl ConfigError {
    #[must_use]
    pub fn parse(format: &'static str, source: impl std::fmt::Display) -> Self {
        Self::Parse {
            format,
            message: source.to_string(),
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

    /// Validation diagnostics, when the failure was a rejected document.
    #[must_use]
    pub fn validation(&self) -> Option<&ValidationResult> {
        match self {
            Self::Invalid(result) => Some(result),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
