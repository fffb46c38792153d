//! Orchestration core: turns chat events into model calls and replies.
//!
//! [`AgentsService`] receives posted and updated messages from the host,
//! decides whether a bot is addressed, and answers on background tasks it
//! owns. Each run works against the configuration snapshot it was admitted
//! with; edits supersede in-flight runs; deactivation drains everything.

pub mod completion;
pub mod error;
pub mod links;
pub mod retry;
mod run;
pub mod service;
pub mod tracker;

pub use {
    error::{ActivationError, DeactivationError, RunError, ServiceError},
    service::{AgentsService, BotInfo, Dispatch, ServiceDeps, ServiceStatus, drop_reason},
    tracker::ConversationTracker,
};
