//! OpenAI-compatible completion backend

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use phone_agent_config::CompletionConfig;
use phone_agent_core::{CompletionClient, CompletionError, Turn};

use crate::LlmError;

/// Configuration for OpenAI-compatible backends
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API endpoint (OpenAI: https://api.openai.com/v1)
    pub endpoint: String,
    /// Bearer credential; no Authorization header is sent when absent
    pub api_key: Option<String>,
    /// Model name (gpt-3.5-turbo, gpt-4o-mini, ...)
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: None,
            temperature: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl OpenAiConfig {
    /// Create config for a local OpenAI-compatible server
    pub fn local(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            ..Default::default()
        }
    }
}

impl From<&CompletionConfig> for OpenAiConfig {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// One chat message as sent on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// Assemble the request messages: system prompt first (verbatim, even when
/// empty), then the history in order, then the new user text.
pub fn build_messages(history: &[Turn], user_text: &str, system_prompt: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::new("system", system_prompt));
    messages.extend(
        history
            .iter()
            .map(|turn| ChatMessage::new(turn.speaker().as_str(), turn.text())),
    );
    messages.push(ChatMessage::new("user", user_text));
    messages
}

/// Chat completion client for OpenAI-compatible APIs
pub struct OpenAiCompletionClient {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiCompletionClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        if config.endpoint.trim().is_empty() {
            return Err(LlmError::Configuration("endpoint is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Get the full API URL for chat completions
    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    fn build_headers(&self) -> reqwest::header::HeaderMap {
        use reqwest::header::HeaderValue;

        let mut headers = reqwest::header::HeaderMap::new();

        if let Some(ref key) = self.config.api_key {
            if let Ok(val) = HeaderValue::from_str(&format!("Bearer {}", key)) {
                headers.insert(reqwest::header::AUTHORIZATION, val);
            }
        }

        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        headers
    }

    async fn request(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.chat_url())
            .headers(self.build_headers())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

        match choice.message.content {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(LlmError::InvalidResponse(
                "Empty message content".to_string(),
            )),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(
        &self,
        history: &[Turn],
        user_text: &str,
        system_prompt: &str,
    ) -> Result<String, CompletionError> {
        let start = Instant::now();
        let messages = build_messages(history, user_text, system_prompt);

        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            "Requesting completion"
        );

        match self.request(messages).await {
            Ok(text) => {
                tracing::info!(
                    model = %self.config.model,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    chars = text.chars().count(),
                    "Completion received"
                );
                Ok(text)
            }
            Err(e) => {
                tracing::warn!(model = %self.config.model, error = %e, "Completion failed");
                Err(e.into())
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
