//! External agent invocation.
//!
//! The dispatcher treats the agent as a single opaque long-running call:
//! transcript in, text out. `AgentRunner` is the seam; `AnthropicAgent`
//! implements it against the Anthropic Messages API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::error::AgentError;
use crate::prompt;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

/// One opaque agent call. May take minutes; may fail; an empty string is a
/// valid (empty) result, not an error.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn invoke(&self, session_key: &str, context: &str) -> Result<String, AgentError>;
}

/// Anthropic Messages API implementation.
pub struct AnthropicAgent {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
    dry_run: bool,
}

impl AnthropicAgent {
    pub fn new(api_key: SecretString, model: String, dry_run: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            dry_run,
        }
    }
}

#[async_trait]
impl AgentRunner for AnthropicAgent {
    async fn invoke(&self, session_key: &str, context: &str) -> Result<String, AgentError> {
        let user_prompt = prompt::build_prompt(context, self.dry_run);
        tracing::info!(session_key, model = %self.model, "Running agent");

        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": prompt::SYSTEM_PROMPT.trim(),
            "metadata": { "user_id": session_key },
            "messages": [{ "role": "user", "content": user_prompt }],
        });

        let resp = self
            .http
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::RequestFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(AgentError::RequestFailed(format!(
                "{status}: {}",
                detail.chars().take(300).collect::<String>()
            )));
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            tracing::info!(
                session_key,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Agent done"
            );
        }

        Ok(extract_text(&parsed))
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

fn extract_text(resp: &MessagesResponse) -> String {
    resp.content
        .iter()
        .filter(|block| block.kind == "text")
        .map(|block| block.text.as_str())
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_concatenated_text_blocks() {
        let resp: MessagesResponse = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "Hello " },
                { "type": "tool_use", "id": "x", "name": "t", "input": {} },
                { "type": "text", "text": "world" }
            ],
            "usage": { "input_tokens": 10, "output_tokens": 5 }
        }))
        .unwrap();
        assert_eq!(extract_text(&resp), "Hello world");
    }

    #[test]
    fn empty_content_is_an_empty_result() {
        let resp: MessagesResponse = serde_json::from_value(json!({ "content": [] })).unwrap();
        assert_eq!(extract_text(&resp), "");
    }
}
