use std::path::PathBuf;

use crate::{loader::load_config, schema::PluginConfig};

/// Where the host keeps the plugin's configuration document.
pub trait ConfigSource: Send + Sync {
    /// Load the current document. Validation happens in the store.
    fn load(&self) -> anyhow::Result<PluginConfig>;
}

/// Reads the document from a file on every load.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> anyhow::Result<PluginConfig> {
        Ok(load_config(&self.path)?)
    }
}

/// Serves a fixed, in-memory document.
#[derive(Debug, Clone)]
pub struct StaticConfigSource(pub PluginConfig);

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> anyhow::Result<PluginConfig> {
        Ok(self.0.clone())
    }
}
