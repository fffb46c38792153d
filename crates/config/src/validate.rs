//! Configuration validation engine.
//!
//! Checks raw documents for syntax errors and unknown/misspelled fields, then
//! runs structural rules over the parsed [`PluginConfig`]. Diagnostics with
//! [`Severity::Error`] block publication; warnings are reported only.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use serde::Serialize;

use crate::{
    loader::ConfigFormat,
    schema::{PluginConfig, TRUSTED_UPSTREAM_TIMEOUT, TrustLevel},
};

/// Upper bound for `retry.max_attempts`.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "missing-field",
    /// "invalid-value", "duplicate", "reference", "security", "unused"
    pub category: &'static str,
    /// Dotted path, e.g. "endpoints[0].url"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn error(category: &'static str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category,
            path: path.into(),
            message: message.into(),
        }
    }

    fn warning(
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.severity, self.message)
        } else {
            write!(f, "{} at {}: {}", self.severity, self.path, self.message)
        }
    }
}

/// Result of validating a configuration document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    /// One-line summary: error count plus the first error.
    #[must_use]
    pub fn summary(&self) -> String {
        let errors = self.count(Severity::Error);
        match self.errors().next() {
            Some(first) if errors > 1 => format!("{errors} errors, first: {first}"),
            Some(first) => first.to_string(),
            None => "no errors".into(),
        }
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Represents the expected shape of the configuration schema.
enum KnownKeys {
    /// A struct with fixed field names.
    Struct(HashMap<&'static str, KnownKeys>),
    /// An array of typed items.
    Array(Box<KnownKeys>),
    /// Scalar value; recursion stops here.
    Leaf,
}

/// Build the full schema map mirroring every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Array, Leaf, Struct};

    let endpoint = Struct(HashMap::from([
        ("name", Leaf),
        ("url", Leaf),
        ("api_key", Leaf),
        ("model", Leaf),
        ("trust", Leaf),
        ("timeout_secs", Leaf),
    ]));

    let bot = Struct(HashMap::from([
        ("name", Leaf),
        ("display_name", Leaf),
        ("endpoint", Leaf),
        ("system_prompt", Leaf),
    ]));

    Struct(HashMap::from([
        ("endpoints", Array(Box::new(endpoint))),
        ("bots", Array(Box::new(bot))),
        ("default_bot", Leaf),
        (
            "features",
            Struct(HashMap::from([
                ("fetch_links", Leaf),
                ("reprocess_edits", Leaf),
                ("max_links", Leaf),
            ])),
        ),
        (
            "retry",
            Struct(HashMap::from([
                ("max_attempts", Leaf),
                ("initial_backoff_ms", Leaf),
                ("max_backoff_ms", Leaf),
            ])),
        ),
        (
            "http",
            Struct(HashMap::from([
                ("untrusted_timeout_secs", Leaf),
                ("max_redirects", Leaf),
                ("allow_private_networks", Leaf),
                ("max_fetch_bytes", Leaf),
            ])),
        ),
        ("shutdown", Struct(HashMap::from([("grace_secs", Leaf)]))),
        (
            "deployment",
            Struct(HashMap::from([("site_url", Leaf), ("environment", Leaf)])),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Best match for `needle` among `candidates` within `max_distance` edits.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── Raw document validation ─────────────────────────────────────────────────

/// Validate a config file on disk. The format follows the file extension.
#[must_use]
pub fn validate_file(path: &Path) -> ValidationResult {
    let format = match ConfigFormat::from_path(path) {
        Ok(format) => format,
        Err(e) => {
            return ValidationResult {
                diagnostics: vec![Diagnostic::error("syntax", "", e.to_string())],
                config_path: Some(path.to_path_buf()),
            };
        },
    };

    let mut result = match std::fs::read_to_string(path) {
        Ok(raw) => validate_str(&crate::env_subst::substitute_env(&raw), format),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::error(
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(path.to_path_buf());
    result
}

/// Validate a raw document without file-system side effects (used by tests,
/// the CLI and the `config/validate` API endpoint).
#[must_use]
pub fn validate_str(raw: &str, format: ConfigFormat) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax
    let value = match crate::loader::parse_config_value(raw, format) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::error("syntax", "", e.to_string()));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    // 3. Types, then structural rules on the parsed document
    match serde_json::from_value::<PluginConfig>(value) {
        Ok(config) => diagnostics.extend(validate_config(&config).diagnostics),
        Err(e) => diagnostics.push(Diagnostic::error(
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Walk the value tree against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match (value, schema) {
        (serde_json::Value::Object(table), KnownKeys::Struct(fields)) => {
            let known_keys: Vec<&str> = fields.keys().copied().collect();
            for (key, child_value) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                if let Some(child_schema) = fields.get(key.as_str()) {
                    check_unknown_fields(child_value, child_schema, &path, diagnostics);
                    continue;
                }
                let level = if prefix.is_empty() {
                    " at top level"
                } else {
                    ""
                };
                let msg = match suggest(key, &known_keys, 3) {
                    Some(s) => format!("unknown field{level} (did you mean \"{s}\"?)"),
                    None => format!("unknown field{level}"),
                };
                diagnostics.push(Diagnostic::error("unknown-field", path, msg));
            }
        },
        (serde_json::Value::Array(items), KnownKeys::Array(item_schema)) => {
            for (i, item) in items.iter().enumerate() {
                let path = format!("{prefix}[{i}]");
                check_unknown_fields(item, item_schema, &path, diagnostics);
            }
        },
        // Leaf or type mismatch: stop here, type errors surface on deserialize
        _ => {},
    }
}

// ── Structural rules ────────────────────────────────────────────────────────

/// Run the structural rules over an already-parsed configuration.
#[must_use]
pub fn validate_config(config: &PluginConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    check_endpoints(config, &mut diagnostics);
    check_bots(config, &mut diagnostics);
    check_retry(config, &mut diagnostics);
    check_http(config, &mut diagnostics);
    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_endpoints(config: &PluginConfig, diagnostics: &mut Vec<Diagnostic>) {
    if config.endpoints.is_empty() {
        diagnostics.push(Diagnostic::error(
            "missing-field",
            "endpoints",
            "at least one endpoint must be configured",
        ));
    }

    let mut seen = HashSet::new();
    for (i, endpoint) in config.endpoints.iter().enumerate() {
        let path = format!("endpoints[{i}]");

        if endpoint.name.trim().is_empty() {
            diagnostics.push(Diagnostic::error(
                "missing-field",
                format!("{path}.name"),
                "endpoint name is required",
            ));
        } else if !seen.insert(endpoint.name.as_str()) {
            diagnostics.push(Diagnostic::error(
                "duplicate",
                format!("{path}.name"),
                format!("duplicate endpoint name \"{}\"", endpoint.name),
            ));
        }

        if endpoint.model.trim().is_empty() {
            diagnostics.push(Diagnostic::error(
                "missing-field",
                format!("{path}.model"),
                "endpoint model is required",
            ));
        }

        check_endpoint_url(&endpoint.url, endpoint.trust, &path, diagnostics);

        match endpoint.timeout_secs {
            Some(0) => diagnostics.push(Diagnostic::error(
                "invalid-value",
                format!("{path}.timeout_secs"),
                "timeout_secs must be greater than zero",
            )),
            Some(secs) if secs > TRUSTED_UPSTREAM_TIMEOUT.as_secs() => {
                diagnostics.push(Diagnostic::error(
                    "invalid-value",
                    format!("{path}.timeout_secs"),
                    format!(
                        "timeout_secs {secs} exceeds the upstream ceiling of {}",
                        TRUSTED_UPSTREAM_TIMEOUT.as_secs()
                    ),
                ));
            },
            _ => {},
        }

        if endpoint.api_key.is_none() {
            diagnostics.push(Diagnostic::warning(
                "security",
                format!("{path}.api_key"),
                "no api_key set; requests will be sent without credentials",
            ));
        }

        if !endpoint.name.is_empty() && !config.bots.iter().any(|b| b.endpoint == endpoint.name) {
            diagnostics.push(Diagnostic::warning(
                "unused",
                path,
                format!("endpoint \"{}\" is not used by any bot", endpoint.name),
            ));
        }
    }
}

fn check_endpoint_url(
    raw: &str,
    trust: TrustLevel,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let path = format!("{path}.url");
    if raw.trim().is_empty() {
        diagnostics.push(Diagnostic::error(
            "missing-field",
            path,
            "endpoint url is required",
        ));
        return;
    }
    let url = match url::Url::parse(raw) {
        Ok(url) => url,
        Err(e) => {
            diagnostics.push(Diagnostic::error(
                "invalid-value",
                path,
                format!("invalid url: {e}"),
            ));
            return;
        },
    };
    if !matches!(url.scheme(), "http" | "https") {
        diagnostics.push(Diagnostic::error(
            "invalid-value",
            path,
            format!("unsupported url scheme \"{}\"", url.scheme()),
        ));
        return;
    }
    if url.host_str().is_none_or(str::is_empty) {
        diagnostics.push(Diagnostic::error(
            "invalid-value",
            path,
            "url has no host",
        ));
        return;
    }
    if trust == TrustLevel::Untrusted && url.scheme() == "http" {
        diagnostics.push(Diagnostic::warning(
            "security",
            path,
            "untrusted endpoint is reached over plain http",
        ));
    }
}

fn check_bots(config: &PluginConfig, diagnostics: &mut Vec<Diagnostic>) {
    let mut seen = HashSet::new();
    for (i, bot) in config.bots.iter().enumerate() {
        let path = format!("bots[{i}]");

        if bot.name.trim().is_empty() {
            diagnostics.push(Diagnostic::error(
                "missing-field",
                format!("{path}.name"),
                "bot name is required",
            ));
        } else if !seen.insert(bot.name.as_str()) {
            diagnostics.push(Diagnostic::error(
                "duplicate",
                format!("{path}.name"),
                format!("duplicate bot name \"{}\"", bot.name),
            ));
        }

        if config.endpoint(&bot.endpoint).is_none() {
            let names: Vec<&str> = config.endpoints.iter().map(|e| e.name.as_str()).collect();
            let msg = match suggest(&bot.endpoint, &names, 3) {
                Some(s) => format!(
                    "unknown endpoint \"{}\" (did you mean \"{s}\"?)",
                    bot.endpoint
                ),
                None => format!("unknown endpoint \"{}\"", bot.endpoint),
            };
            diagnostics.push(Diagnostic::error(
                "reference",
                format!("{path}.endpoint"),
                msg,
            ));
        }
    }

    if let Some(default_bot) = &config.default_bot
        && config.bot(default_bot).is_none()
    {
        diagnostics.push(Diagnostic::error(
            "reference",
            "default_bot",
            format!("default_bot \"{default_bot}\" is not a configured bot"),
        ));
    }
}

fn check_retry(config: &PluginConfig, diagnostics: &mut Vec<Diagnostic>) {
    let retry = &config.retry;
    if !(1..=MAX_RETRY_ATTEMPTS).contains(&retry.max_attempts) {
        diagnostics.push(Diagnostic::error(
            "invalid-value",
            "retry.max_attempts",
            format!("max_attempts must be between 1 and {MAX_RETRY_ATTEMPTS}"),
        ));
    }
    if retry.initial_backoff_ms > retry.max_backoff_ms {
        diagnostics.push(Diagnostic::error(
            "invalid-value",
            "retry.initial_backoff_ms",
            "initial_backoff_ms must not exceed max_backoff_ms",
        ));
    }
}

fn check_http(config: &PluginConfig, diagnostics: &mut Vec<Diagnostic>) {
    if config.http.untrusted_timeout_secs == 0 {
        diagnostics.push(Diagnostic::error(
            "invalid-value",
            "http.untrusted_timeout_secs",
            "untrusted_timeout_secs must be greater than zero",
        ));
    }
    if config.http.allow_private_networks {
        diagnostics.push(Diagnostic::warning(
            "security",
            "http.allow_private_networks",
            "untrusted fetches may reach loopback and private networks",
        ));
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    const VALID: &str = r#"
default_bot = "ai"

[[endpoints]]
name = "openai"
url = "https://api.openai.com/v1"
api_key = "sk-test"
model = "gpt-4o"

[[bots]]
name = "ai"
display_name = "Assistant"
endpoint = "openai"
"#;

    fn find<'a>(result: &'a ValidationResult, category: &str, path: &str) -> Option<&'a Diagnostic> {
        result
            .diagnostics
            .iter()
            .find(|d| d.category == category && d.path == path)
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("cat", "car"), 1);
        assert_eq!(levenshtein("endpont", "endpoint"), 1);
    }

    #[test]
    fn suggest_returns_none_for_distant() {
        let candidates = &["endpoints", "bots", "retry"];
        assert_eq!(suggest("endponts", candidates, 3), Some("endpoints"));
        assert_eq!(suggest("completely_different", candidates, 3), None);
    }

    #[test]
    fn valid_config_has_no_diagnostics() {
        let result = validate_str(VALID, ConfigFormat::Toml);
        assert!(
            result.diagnostics.is_empty(),
            "unexpected diagnostics: {:?}",
            result.diagnostics
        );
    }

    #[test]
    fn syntax_error_detected() {
        let result = validate_str("[[endpoints]\nname = ", ConfigFormat::Toml);
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn unknown_top_level_key_with_suggestion() {
        let raw = format!("default_bto = \"ai\"\n{VALID}");
        let result = validate_str(&raw, ConfigFormat::Toml);
        let d = find(&result, "unknown-field", "default_bto").expect("unknown field");
        assert_eq!(d.severity, Severity::Error);
        assert!(d.message.contains("default_bot"), "{}", d.message);
    }

    #[test]
    fn unknown_field_inside_endpoint_entry() {
        let raw = VALID.replace("model = ", "modle = \"x\"\nmodel = ");
        let result = validate_str(&raw, ConfigFormat::Toml);
        let d = find(&result, "unknown-field", "endpoints[0].modle").expect("unknown field");
        assert!(d.message.contains("model"));
    }

    #[test]
    fn json_documents_are_checked_too() {
        let raw = r#"{"endpoints": [], "featurs": {}}"#;
        let result = validate_str(raw, ConfigFormat::Json);
        assert!(find(&result, "unknown-field", "featurs").is_some());
        assert!(find(&result, "missing-field", "endpoints").is_some());
    }

    #[test]
    fn type_error_reported() {
        let raw = format!("{VALID}\n[retry]\nmax_attempts = \"three\"\n");
        let result = validate_str(&raw, ConfigFormat::Toml);
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[rstest]
    #[case::missing_url("url = \"https://api.openai.com/v1\"", "url = \"\"", "endpoints[0].url")]
    #[case::bad_scheme(
        "url = \"https://api.openai.com/v1\"",
        "url = \"ftp://api.openai.com\"",
        "endpoints[0].url"
    )]
    #[case::missing_model("model = \"gpt-4o\"", "model = \"\"", "endpoints[0].model")]
    #[case::unknown_bot_endpoint("endpoint = \"openai\"", "endpoint = \"opneai\"", "bots[0].endpoint")]
    #[case::unknown_default_bot("default_bot = \"ai\"", "default_bot = \"nobody\"", "default_bot")]
    #[case::zero_timeout("model = \"gpt-4o\"", "model = \"gpt-4o\"\ntimeout_secs = 0", "endpoints[0].timeout_secs")]
    #[case::timeout_above_ceiling(
        "model = \"gpt-4o\"",
        "model = \"gpt-4o\"\ntimeout_secs = 3600",
        "endpoints[0].timeout_secs"
    )]
    fn structural_errors(#[case] from: &str, #[case] to: &str, #[case] path: &str) {
        let raw = VALID.replace(from, to);
        let result = validate_str(&raw, ConfigFormat::Toml);
        assert!(result.has_errors(), "expected error at {path}");
        assert!(
            result.errors().any(|d| d.path == path),
            "no error at {path}: {:?}",
            result.diagnostics
        );
    }

    #[test]
    fn duplicate_names_rejected() {
        let raw = VALID.replace(
            "[[bots]]",
            "[[endpoints]]\nname = \"openai\"\nurl = \"https://x.example\"\nmodel = \"m\"\n\n[[bots]]",
        );
        let result = validate_str(&raw, ConfigFormat::Toml);
        assert!(find(&result, "duplicate", "endpoints[1].name").is_some());
    }

    #[test]
    fn suggestion_for_misspelled_bot_endpoint() {
        let raw = VALID.replace("endpoint = \"openai\"", "endpoint = \"opneai\"");
        let result = validate_str(&raw, ConfigFormat::Toml);
        let d = find(&result, "reference", "bots[0].endpoint").unwrap();
        assert!(d.message.contains("did you mean \"openai\""));
    }

    #[test]
    fn retry_bounds_enforced() {
        let raw = format!("{VALID}\n[retry]\nmax_attempts = 11\n");
        let result = validate_str(&raw, ConfigFormat::Toml);
        assert!(result.errors().any(|d| d.path == "retry.max_attempts"));
    }

    #[test]
    fn warnings_do_not_block() {
        let raw = r#"
[[endpoints]]
name = "local"
url = "http://10.0.0.5:8080"
model = "llama"
trust = "untrusted"

[[endpoints]]
name = "spare"
url = "https://spare.example"
model = "m"
api_key = "k"

[[bots]]
name = "ai"
endpoint = "local"
"#;
        let result = validate_str(raw, ConfigFormat::Toml);
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        assert!(find(&result, "security", "endpoints[0].api_key").is_some());
        assert!(find(&result, "security", "endpoints[0].url").is_some());
        assert!(find(&result, "unused", "endpoints[1]").is_some());
    }

    #[test]
    fn summary_mentions_first_error() {
        let result = validate_config(&PluginConfig::default());
        assert!(result.summary().contains("at least one endpoint"));
    }

    #[test]
    fn schema_drift_guard() {
        let mut config: PluginConfig = toml::from_str(VALID).unwrap();
        config.endpoints[0].timeout_secs = Some(30);
        config.bots[0].system_prompt = Some("be brief".into());
        config.deployment.site_url = Some("https://chat.example".into());
        config.deployment.environment = Some("prod".into());

        let value = serde_json::to_value(&config).unwrap();
        let mut diagnostics = Vec::new();
        check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);
        assert!(
            diagnostics.is_empty(),
            "schema map is missing keys present in PluginConfig: {diagnostics:?}"
        );
    }
}
