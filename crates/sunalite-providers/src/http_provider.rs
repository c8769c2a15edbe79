//! Generic HTTP-based provider for OpenAI-compatible APIs.
//!
//! Talks directly to any `/chat/completions` endpoint: OpenAI itself, or a
//! local server (Ollama, vLLM, llama.cpp) exposing the same surface.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error};

use sunalite_core::config::schema::AgentConfig;
use sunalite_core::types::{ChatCompletionRequest, ChatCompletionResponse, LlmResponse, Message, ToolDefinition};

use crate::error::ProviderError;
use crate::traits::{LlmProvider, LlmRequestConfig};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// A provider that talks to any OpenAI-compatible HTTP API.
pub struct HttpProvider {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL (e.g. `"https://api.openai.com/v1"`).
    api_base: String,
    /// Bearer token; omitted from requests when empty.
    api_key: String,
    default_model: String,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl HttpProvider {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;

        Ok(HttpProvider {
            client,
            api_base: api_base.into(),
            api_key: api_key.into(),
            default_model: model.into(),
        })
    }

    /// Build from the `agent` config section.
    pub fn from_config(config: &AgentConfig) -> Result<Self, ProviderError> {
        debug!(api_base = %config.base_url, model = %config.model, "Creating LLM provider");
        Self::new(&config.base_url, &config.api_key, &config.model)
    }

    /// Build the full chat completions URL.
    fn completions_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{}/chat/completions", base)
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError> {
        debug!(
            model = %model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            "Calling LLM"
        );

        let request_body = ChatCompletionRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.filter(|t| !t.is_empty()).map(|t| t.to_vec()),
            tool_choice: tools.filter(|t| !t.is_empty()).map(|_| "auto".to_string()),
            max_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
        };

        let mut request = self.client.post(self.completions_url()).json(&request_body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await.map_err(|e| {
            error!(error = %e, "HTTP request failed");
            ProviderError::Transport(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(status = %status, body = %body, "API error");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat_resp = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to parse LLM response");
                ProviderError::Decode(e.to_string())
            })?;

        let llm_resp = chat_resp.into_llm_response().ok_or(ProviderError::EmptyResponse)?;
        debug!(
            has_content = llm_resp.content.is_some(),
            tool_calls = llm_resp.tool_calls.len(),
            finish_reason = llm_resp.finish_reason.as_deref().unwrap_or("?"),
            "LLM response received"
        );
        Ok(llm_resp)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        "OpenAI-compatible"
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
