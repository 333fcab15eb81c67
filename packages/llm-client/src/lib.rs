//! Minimal chat-completion client for OpenAI-compatible APIs.
//!
//! Used by the communication engine's AI content generator to enhance
//! templated messages. No streaming, tool use, or embeddings — just a single
//! request/response chat completion call against a configurable base URL, so
//! any OpenAI-compatible provider works without code changes.

pub mod error;
pub mod types;

pub use error::{LlmError, Result};
pub use types::*;

use reqwest::Client;
use tracing::{debug, warn};

/// Chat-completion client.
#[derive(Clone)]
pub struct LlmClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl LlmClient {
    /// Create a new client with the given API key and base URL.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    /// Chat completion.
    ///
    /// Send messages to the chat completion API and get a response.
    pub async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        let start = std::time::Instant::now();

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "LLM request failed");
                LlmError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "LLM API error");
            return Err(LlmError::Api(format!("LLM API error: {}", error_text)));
        }

        let chat_response: types::ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Api("no response from LLM".into()))?;

        debug!(
            model = %request.model,
            duration_ms = start.elapsed().as_millis(),
            "LLM chat completion"
        );

        Ok(ChatResponse {
            content,
            usage: chat_response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = LlmClient::new("sk-test", "https://api.openai.com/v1");

        assert_eq!(client.api_key, "sk-test");
        assert_eq!(client.base_url, "https://api.openai.com/v1");
    }
}
