use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity the plugin reports to its host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub version: String,
}

impl Manifest {
    /// Manifest of this build.
    #[must_use]
    pub fn current() -> Self {
        Self {
            id: "parley".into(),
            name: "Parley".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }

    /// Parse a host-supplied `plugin.json`.
    pub fn from_json(raw: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(raw)
            .map_err(|e| Error::message(format!("invalid plugin manifest: {e}")))?;
        if manifest.id.trim().is_empty() {
            return Err(Error::message("plugin manifest is missing an id"));
        }
        if manifest.version.trim().is_empty() {
            return Err(Error::message("plugin manifest is missing a version"));
        }
        Ok(manifest)
    }

    /// `User-Agent` for outbound requests, e.g. `parley/0.4.2`.
    #[must_use]
    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.id, self.version)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::current()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_uses_crate_version() {
        let manifest = Manifest::current();
        assert_eq!(manifest.id, "parley");
        assert_eq!(manifest.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            manifest.user_agent(),
            format!("parley/{}", env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn parses_host_manifest() {
        let manifest = Manifest::from_json(r#"{"id": "com.example.parley", "version": "1.2.0"}"#)
            .unwrap();
        assert_eq!(manifest.id, "com.example.parley");
        assert_eq!(manifest.name, "");
        assert_eq!(manifest.user_agent(), "com.example.parley/1.2.0");
    }

    #[test]
    fn rejects_incomplete_manifest() {
        let err = Manifest::from_json(r#"{"id": " ", "version": "1.0.0"}"#).unwrap_err();
        assert!(err.to_string().contains("missing an id"));
        assert!(Manifest::from_json(r#"{"id": "parley"}"#).is_err());
        assert!(Manifest::from_json("not json").is_err());
    }
}
