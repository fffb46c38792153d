use parley_config::{EndpointConfig, TrustLevel};

use crate::{client::UpstreamClient, error::Result, factory::HttpServiceFactory};

/// The two long-lived clients of one activation.
#[derive(Debug, Clone)]
pub struct ClientPool {
    trusted: UpstreamClient,
    untrusted: UpstreamClient,
}

impl ClientPool {
    pub fn from_factory(factory: &dyn HttpServiceFactory) -> Result<Self> {
        Ok(Self {
            trusted: factory.make_client(TrustLevel::Trusted)?,
            untrusted: factory.make_client(TrustLevel::Untrusted)?,
        })
    }

    #[must_use]
    pub fn trusted(&self) -> &UpstreamClient {
        &self.trusted
    }

    #[must_use]
    pub fn untrusted(&self) -> &UpstreamClient {
        &self.untrusted
    }

    #[must_use]
    pub fn for_trust(&self, trust: TrustLevel) -> &UpstreamClient {
        match trust {
            TrustLevel::Trusted => &self.trusted,
            TrustLevel::Untrusted => &self.untrusted,
        }
    }

    /// Client for an endpoint: picked by trust, with the endpoint's timeout
    /// override applied when it is shorter than the client's.
    #[must_use]
    pub fn for_endpoint(&self, endpoint: &EndpointConfig) -> UpstreamClient {
        let client = self.for_trust(endpoint.trust);
        match endpoint.timeout() {
            Some(t) if t < client.timeout() => client.with_timeout(t),
            _ => client.clone(),
        }
    }
}
