use {
    parley_agents::{ActivationError, DeactivationError, ServiceError},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("activation failed: {0}")]
    Activation(#[from] ActivationError),

    #[error("deactivation failed: {0}")]
    Deactivation(#[from] DeactivationError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("plugin is already active")]
    AlreadyActive,

    #[error("plugin is not active")]
    NotActive,

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Stable label for logs and HTTP error bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Activation(_) => "activation",
            Self::Deactivation(_) => "deactivation",
            Self::Service(e) => e.kind(),
            Self::AlreadyActive => "already_active",
            Self::NotActive => "not_active",
            Self::Message(_) => "message",
        }
    }
}

impl parley_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

parley_common::impl_context!();
