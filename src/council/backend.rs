//! Reasoning backends: whatever turns a role instruction plus batch context
//! into a small JSON reply.

use crate::config::CouncilConfig;
use crate::error::CouncilError;

use serde::Deserialize;

use std::time::Duration;

/// Anything that can answer a council role call.
///
/// Implementations return the raw reply text; the council owns parsing and
/// fallback so every backend gets the same failure semantics.
#[async_trait::async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    async fn complete(&self, system_prompt: &str, context: &str) -> Result<String, CouncilError>;
}

/// OpenAI-compatible `/chat/completions` client (Groq, OpenAI, OpenRouter, …).
#[derive(Debug, Clone)]
pub struct ChatCompletionsBackend {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl ChatCompletionsBackend {
    pub fn new(config: &CouncilConfig) -> Result<Self, CouncilError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(CouncilError::MissingApiKey)?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait::async_trait]
impl ReasoningBackend for ChatCompletionsBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system_prompt: &str, context: &str) -> Result<String, CouncilError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": context},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .http_client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CouncilError::Status {
                status: status.as_u16(),
                body: truncate(&body, 500).to_string(),
            });
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| CouncilError::Malformed("response had no message content".into()))
    }
}

/// Pull a JSON object out of a model reply.
///
/// Tolerates prose or code fences around the object by taking the outermost
/// braces.
pub fn parse_json_object(
    reply: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, CouncilError> {
    let start = reply
        .find('{')
        .ok_or_else(|| CouncilError::Malformed("no JSON object in reply".into()))?;
    let end = reply
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| CouncilError::Malformed("unterminated JSON object in reply".into()))?;

    match serde_json::from_str::<serde_json::Value>(&reply[start..=end]) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(CouncilError::Malformed("reply is not a JSON object".into())),
        Err(error) => Err(CouncilError::Malformed(error.to_string())),
    }
}

fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        value
    } else {
        let mut end = max;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        &value[..end]
    }
}
