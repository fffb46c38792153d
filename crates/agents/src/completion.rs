//! OpenAI-compatible chat-completions request and response.

use {
    parley_config::{BotConfig, EndpointConfig},
    parley_httpservice::{UpstreamError, UpstreamRequest, UpstreamResponse},
    serde::{Deserialize, Serialize},
};

use crate::links::LinkContext;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Token usage reported by the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Usage {
    #[serde(rename = "prompt_tokens")]
    pub input_tokens: u64,
    #[serde(rename = "completion_tokens")]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[must_use]
pub fn completions_url(endpoint: &EndpointConfig) -> String {
    format!("{}/chat/completions", endpoint.url.trim_end_matches('/'))
}

/// The prompt: optional system prompt, then the user's message with any
/// fetched link content appended.
#[must_use]
pub fn build_messages(bot: &BotConfig, message: &str, links: &[LinkContext]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(prompt) = bot.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
        messages.push(ChatMessage::system(prompt));
    }

    let mut user = message.to_string();
    for link in links {
        user.push_str("\n\n---\nContent of ");
        user.push_str(&link.url);
        if link.truncated {
            user.push_str(" (truncated)");
        }
        user.push_str(":\n");
        user.push_str(&link.content);
    }
    messages.push(ChatMessage::user(user));
    messages
}

pub fn build_request(
    endpoint: &EndpointConfig,
    messages: &[ChatMessage],
) -> Result<UpstreamRequest, UpstreamError> {
    let body = serde_json::json!({
        "model": endpoint.model,
        "messages": messages,
        "stream": false,
    });
    let request = UpstreamRequest::post_json(&endpoint.name, completions_url(endpoint), body)
        .with_timeout(endpoint.timeout());
    match endpoint.api_key() {
        Some(key) => request.with_bearer(key),
        None => Ok(request),
    }
}

pub fn parse_response(response: &UpstreamResponse) -> Result<Completion, UpstreamError> {
    let parsed: ChatResponse = response.json()?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| UpstreamError::InvalidResponse("completion has no content".into()))?;
    Ok(Completion {
        content,
        model: parsed.model,
        usage: parsed.usage.unwrap_or_default(),
    })
}
