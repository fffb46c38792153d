//! Outbound HTTP for parley.
//!
//! Two clients per activation: a trusted one for operator-approved LLM
//! endpoints (long timeout) and an untrusted one for anything user content
//! points at (short timeout, private-network guard, manual redirects).

pub mod client;
pub mod deadline;
pub mod error;
pub mod factory;
pub mod pool;
pub mod ssrf;
pub mod upstream;

pub use {
    client::{FetchPolicy, FetchedResource, UpstreamClient},
    deadline::CallDeadline,
    error::{Result, UpstreamError},
    factory::{DefaultHttpServiceFactory, HttpServiceFactory},
    parley_config::{TRUSTED_UPSTREAM_TIMEOUT, TrustLevel},
    pool::ClientPool,
    upstream::{UpstreamRequest, UpstreamResponse},
};
