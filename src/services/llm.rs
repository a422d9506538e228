use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(String),
    #[error("llm returned status {0}")]
    Status(u16),
    #[error("llm response was malformed")]
    MalformedResponse,
}

/// Chat-completion collaborator. The API key is supplied per call because it
/// is resolved from a per-node credential, never from process config.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        api_key: &str,
        model: &str,
        system_prompt: &str,
        user_messages: Vec<String>,
    ) -> Result<String, LlmError>;
}

pub struct OpenAiClient {
    http: Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(base_url: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        OpenAiClient { http, base_url }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(
        &self,
        api_key: &str,
        model: &str,
        system_prompt: &str,
        user_messages: Vec<String>,
    ) -> Result<String, LlmError> {
        let mut messages = vec![json!({"role": "system", "content": system_prompt})];
        for content in user_messages {
            messages.push(json!({"role": "user", "content": content}));
        }

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&json!({"model": model, "messages": messages}))
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|_| LlmError::MalformedResponse)?;

        body.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(|s| s.to_string())
            .ok_or(LlmError::MalformedResponse)
    }
}
