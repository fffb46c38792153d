use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    env_subst::substitute_env,
    error::{ConfigError, Result},
    schema::PluginConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["parley.toml", "parley.yaml", "parley.yml", "parley.json"];

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Format implied by the file extension. Files without one are read as TOML.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        Self::from_extension(ext)
    }

    pub fn from_extension(ext: &str) -> Result<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::UnsupportedFormat(format!(".{other}"))),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Toml => "toml",
            Self::Yaml => "yaml",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load config from the given path (any supported format) with `${VAR}`
/// substitution. The result is parsed but not validated.
pub fn load_config(path: &Path) -> Result<PluginConfig> {
    let format = ConfigFormat::from_path(path)?;
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), %format, "loading config");
    parse_config_str(&substitute_env(&raw), format)
}

/// Parse a document already in memory. No env substitution is applied.
pub fn parse_config_str(raw: &str, format: ConfigFormat) -> Result<PluginConfig> {
    match format {
        ConfigFormat::Toml => toml::from_str(raw).map_err(|e| ConfigError::parse("toml", e)),
        ConfigFormat::Yaml => serde_yaml::from_str(raw).map_err(|e| ConfigError::parse("yaml", e)),
        ConfigFormat::Json => serde_json::from_str(raw).map_err(|e| ConfigError::parse("json", e)),
    }
}

/// Parse a document into a format-neutral value tree (for unknown-field checks).
pub fn parse_config_value(raw: &str, format: ConfigFormat) -> Result<serde_json::Value> {
    match format {
        ConfigFormat::Toml => {
            let v: toml::Value = toml::from_str(raw).map_err(|e| ConfigError::parse("toml", e))?;
            serde_json::to_value(v).map_err(|e| ConfigError::parse("toml", e))
        },
        ConfigFormat::Yaml => {
            let v: serde_yaml::Value =
                serde_yaml::from_str(raw).map_err(|e| ConfigError::parse("yaml", e))?;
            serde_json::to_value(v).map_err(|e| ConfigError::parse("yaml", e))
        },
        ConfigFormat::Json => serde_json::from_str(raw).map_err(|e| ConfigError::parse("json", e)),
    }
}

/// Find the first config file in standard locations.
///
/// Search order:
/// 1. `./parley.{toml,yaml,yml,json}`
/// 2. `~/.config/parley/parley.{toml,yaml,yml,json}`
#[must_use]
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/parley/`).
#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "parley").map(|d| d.config_dir().to_path_buf())
}

/// Write the documented default template to `path`, refusing to overwrite.
pub fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(ConfigError::external(
            format!("refusing to overwrite {}", path.display()),
            std::io::Error::from(std::io::ErrorKind::AlreadyExists),
        ));
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Read {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, crate::template::default_config_template()).map_err(|source| {
        ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }
    })?;
    debug!(path = %path.display(), "wrote default config");
    Ok(())
}
