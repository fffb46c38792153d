//! Configuration for parley: schema, loading, validation and the
//! copy-on-write store the rest of the plugin reads from.
//!
//! Config files: `parley.toml`, `parley.yaml`, or `parley.json`.
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod source;
pub mod store;
pub mod template;
pub mod validate;

pub use {
    error::{ConfigError, Result},
    loader::{ConfigFormat, find_config_file, load_config, parse_config_str, write_default_config},
    schema::{
        BotConfig, DeploymentMetadata, EndpointConfig, FeatureFlags, HttpConfig, PluginConfig,
        RetryConfig, ShutdownConfig, TRUSTED_UPSTREAM_TIMEOUT, TrustLevel,
    },
    source::{ConfigSource, FileConfigSource, StaticConfigSource},
    store::{ConfigStore, Snapshot},
    validate::{Diagnostic, Severity, ValidationResult, validate_config, validate_file, validate_str},
};
