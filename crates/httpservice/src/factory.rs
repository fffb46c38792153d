//! Builds configured clients for each trust level.

use std::time::Duration;

use {
    parley_config::{HttpConfig, TRUSTED_UPSTREAM_TIMEOUT, TrustLevel},
    tracing::debug,
};

use crate::{
    client::{FetchPolicy, UpstreamClient},
    error::{Result, UpstreamError},
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Host collaborator that hands out configured HTTP clients.
pub trait HttpServiceFactory: Send + Sync {
    fn make_client(&self, trust: TrustLevel) -> Result<UpstreamClient>;
}

/// Builds `reqwest` clients from the plugin's [`HttpConfig`].
#[derive(Debug, Clone, Default)]
pub struct DefaultHttpServiceFactory {
    config: HttpConfig,
    user_agent: Option<String>,
}

impl DefaultHttpServiceFactory {
    #[must_use]
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            user_agent: None,
        }
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

impl HttpServiceFactory for DefaultHttpServiceFactory {
    fn make_client(&self, trust: TrustLevel) -> Result<UpstreamClient> {
        let user_agent = self
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("parley/{}", env!("CARGO_PKG_VERSION")));

        let (timeout, redirect) = match trust {
            TrustLevel::Trusted => (
                TRUSTED_UPSTREAM_TIMEOUT,
                reqwest::redirect::Policy::limited(usize::from(self.config.max_redirects)),
            ),
            // Redirects are followed by hand so every hop is re-checked.
            TrustLevel::Untrusted => (
                self.config.untrusted_timeout(),
                reqwest::redirect::Policy::none(),
            ),
        };

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .redirect(redirect)
            .user_agent(user_agent)
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;

        debug!(%trust, timeout_secs = timeout.as_secs(), "built upstream client");
        Ok(UpstreamClient::new(
            http,
            trust,
            timeout,
            FetchPolicy::from(&self.config),
        ))
    }
}
