//! Default configuration template with all options documented.
//!
//! Written by `parley config init`. Every option is listed with its default so
//! operators can see what is tunable without reading the schema.

/// The documented default config (TOML).
#[must_use]
pub fn default_config_template() -> &'static str {
    r##"# Parley Configuration
# =====================
# Changes are picked up on the next configuration reload; an invalid document
# is rejected and the previous configuration stays active.
#
# Environment variable substitution is supported: ${ENV_VAR}
# Use $${ to write a literal "${".

# ══════════════════════════════════════════════════════════════════════════════
# ENDPOINTS
# ══════════════════════════════════════════════════════════════════════════════
# OpenAI-compatible chat-completions endpoints. Names must be unique.

[[endpoints]]
name = "openai"
url = "https://api.openai.com/v1"        # Base URL; "/chat/completions" is appended
api_key = "${OPENAI_API_KEY}"
model = "gpt-4o-mini"
trust = "trusted"                        # "trusted" (operator-approved) or "untrusted"
# timeout_secs = 120                     # Per-endpoint override, at most 600

# ══════════════════════════════════════════════════════════════════════════════
# BOTS
# ══════════════════════════════════════════════════════════════════════════════
# Bot accounts users address with @name or by direct message.

[[bots]]
name = "ai"
display_name = "Assistant"
endpoint = "openai"                      # Must name an endpoint above
# system_prompt = "You are a helpful assistant."

# default_bot = "ai"                     # Answers direct channels holding several bots

# ══════════════════════════════════════════════════════════════════════════════
# FEATURES
# ══════════════════════════════════════════════════════════════════════════════

[features]
fetch_links = false                      # Fetch links in messages and pass them to the model
reprocess_edits = true                   # Re-answer a post when its author edits it
max_links = 3                            # Links fetched per message

# ══════════════════════════════════════════════════════════════════════════════
# RETRIES
# ══════════════════════════════════════════════════════════════════════════════

[retry]
max_attempts = 3                         # Total attempts including the first (1-10)
initial_backoff_ms = 500
max_backoff_ms = 8000

# ══════════════════════════════════════════════════════════════════════════════
# OUTBOUND HTTP
# ══════════════════════════════════════════════════════════════════════════════

[http]
untrusted_timeout_secs = 30              # Timeout for untrusted fetches
max_redirects = 5
allow_private_networks = false           # true = untrusted fetches may reach private IPs (DANGEROUS)
max_fetch_bytes = 524288

# ══════════════════════════════════════════════════════════════════════════════
# SHUTDOWN
# ══════════════════════════════════════════════════════════════════════════════

[shutdown]
grace_secs = 5                           # In-flight calls may run this long after deactivation starts

# ══════════════════════════════════════════════════════════════════════════════
# DEPLOYMENT
# ══════════════════════════════════════════════════════════════════════════════

[deployment]
# site_url = "https://chat.example.com"
# environment = "production"
"##
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{loader::ConfigFormat, validate::validate_str},
    };

    #[test]
    fn template_parses_without_errors() {
        let result = validate_str(default_config_template(), ConfigFormat::Toml);
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }
}
