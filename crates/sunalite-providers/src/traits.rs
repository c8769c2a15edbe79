//! LLM Provider trait — the seam between the agent loop and a model backend.

use async_trait::async_trait;
use sunalite_core::types::{LlmResponse, Message, ToolDefinition};

use crate::error::ProviderError;

/// Sampling parameters passed to each call.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            temperature: 0.7,
        }
    }
}

/// Trait that all model backends implement.
///
/// The agent loop treats any `Err` as the backend being unavailable for the
/// current turn; the conversation is left as it was before the call.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request.
    ///
    /// # Arguments
    /// * `messages` — Conversation history in OpenAI format.
    /// * `tools`    — Tool definitions the model may call.
    /// * `model`    — Model identifier (e.g. `"gpt-4o-mini"`).
    /// * `config`   — Temperature, max_tokens.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError>;

    /// The default model for this provider instance.
    fn default_model(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}
