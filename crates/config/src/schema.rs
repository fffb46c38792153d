/// Config schema types (upstream endpoints, bots, feature flags, client policy).
use std::time::Duration;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Hard ceiling for trusted upstream calls. LLM completions can be slow, so
/// this is much longer than anything else in the system. Per-endpoint
/// overrides may shorten it but never extend it.
pub const TRUSTED_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Root plugin configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub endpoints: Vec<EndpointConfig>,
    pub bots: Vec<BotConfig>,
    /// Bot answering direct messages when a direct channel holds several bots.
    pub default_bot: Option<String>,
    pub features: FeatureFlags,
    pub retry: RetryConfig,
    pub http: HttpConfig,
    pub shutdown: ShutdownConfig,
    pub deployment: DeploymentMetadata,
}

impl PluginConfig {
    #[must_use]
    pub fn endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    #[must_use]
    pub fn bot(&self, name: &str) -> Option<&BotConfig> {
        self.bots.iter().find(|b| b.name == name)
    }
}

/// How far an outbound destination is trusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Operator-approved LLM endpoints.
    #[default]
    Trusted,
    /// Anything user content points at.
    Untrusted,
}

impl TrustLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trusted => "trusted",
            Self::Untrusted => "untrusted",
        }
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One upstream LLM endpoint speaking the OpenAI chat-completions dialect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Unique name, referenced from bots and metric labels.
    pub name: String,
    /// Base URL, e.g. "https://api.openai.com/v1".
    pub url: String,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,
    pub model: String,
    pub trust: TrustLevel,
    /// Per-endpoint timeout override in seconds.
    pub timeout_secs: Option<u64>,
}

impl EndpointConfig {
    /// The timeout override, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_ref().map(|k| k.expose_secret().as_str())
    }
}

/// A bot identity users can address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Username, addressed as `@name`.
    pub name: String,
    pub display_name: String,
    /// Name of the endpoint answering for this bot.
    pub endpoint: String,
    pub system_prompt: Option<String>,
}

impl BotConfig {
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Fetch links found in a message (through the untrusted client) and pass
    /// their content to the model.
    pub fetch_links: bool,
    /// Re-answer a post when its author edits it.
    pub reprocess_edits: bool,
    /// Maximum number of links fetched per message.
    pub max_links: usize,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            fetch_links: false,
            reprocess_edits: true,
            max_links: 3,
        }
    }
}

/// Retry policy for transient upstream failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

/// Outbound client policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub untrusted_timeout_secs: u64,
    pub max_redirects: u8,
    /// Let the untrusted client reach loopback and private ranges. Only for
    /// tests and fully on-prem deployments.
    pub allow_private_networks: bool,
    /// Cap on bytes read from a single untrusted resource.
    pub max_fetch_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            untrusted_timeout_secs: 30,
            max_redirects: 5,
            allow_private_networks: false,
            max_fetch_bytes: 512 * 1024,
        }
    }
}

impl HttpConfig {
    #[must_use]
    pub fn untrusted_timeout(&self) -> Duration {
        Duration::from_secs(self.untrusted_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight upstream calls may keep running once deactivation starts.
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 5 }
    }
}

impl ShutdownConfig {
    #[must_use]
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

/// Informational deployment labels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentMetadata {
    pub site_url: Option<String>,
    pub environment: Option<String>,
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let cfg: PluginConfig = toml::from_str(
            r#"
            [[endpoints]]
            name = "openai"
            url = "https://api.openai.com/v1"
            model = "gpt-4o"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.endpoints[0].trust, TrustLevel::Trusted);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert!(cfg.features.reprocess_edits);
        assert!(!cfg.http.allow_private_networks);
        assert_eq!(cfg.shutdown.grace(), Duration::from_secs(5));
    }

    #[test]
    fn api_key_round_trips_through_serialization() {
        let cfg: PluginConfig = toml::from_str(
            r#"
            [[endpoints]]
            name = "openai"
            url = "https://api.openai.com/v1"
            api_key = "sk-test"
            model = "gpt-4o"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.endpoints[0].api_key(), Some("sk-test"));

        let rendered = toml::to_string(&cfg).unwrap();
        assert!(rendered.contains("sk-test"));
        // Debug output never leaks the credential.
        assert!(!format!("{:?}", cfg.endpoints[0]).contains("sk-test"));
    }

    #[test]
    fn bot_display_name_falls_back_to_username() {
        let bot = BotConfig {
            name: "ai".into(),
            ..Default::default()
        };
        assert_eq!(bot.display_name(), "ai");
    }
}
