//! Shared types, host boundary traits, and error helpers used across all parley crates.

pub mod error;
pub mod host;
pub mod types;

pub use {
    error::FromMessage,
    host::{HostApi, NewPost},
    types::{Channel, ChannelKind, ChatEvent, EventContext, Post},
};
