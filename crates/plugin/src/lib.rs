//! Host lifecycle shim.
//!
//! The host drives a [`Plugin`] through the [`PluginHooks`] callbacks. On
//! activation the plugin builds its components in dependency order (config,
//! clients, metrics, orchestration service, HTTP routers) and only publishes
//! them once every step succeeded; until then, and again after deactivation,
//! events are dropped and HTTP requests get a 503.

pub mod error;
pub mod hooks;
pub mod manifest;
pub mod plugin;

pub use {
    error::{Error, Result},
    hooks::PluginHooks,
    manifest::Manifest,
    plugin::Plugin,
};
