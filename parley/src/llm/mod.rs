//! LLM client abstraction for the LLM-call processor.
//!
//! The processor depends on a callable that returns assistant text and optional
//! tool calls; this module defines the trait, the provider config (with fallback),
//! and a mock implementation for tests.
//!
//! # Streaming
//!
//! `LlmClient::invoke_stream()` accepts an optional `Sender<TokenChunk>`; implementations
//! that stream (like [`OpenAiChatClient`]) send tokens as they arrive, others fall back to
//! one chunk with the full content. The method always returns the complete [`LlmReply`].

mod mock;
mod openai;

pub use mock::MockLlm;
pub use openai::OpenAiChatClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Chat roles on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One tool invocation from an assistant message; `arguments` stays a JSON string.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// One prompt message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default)]
    pub content: String,
    /// Speaker name hint for multi-party prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Back-reference for `role == tool` rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool calls on `role == assistant` rows.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::of(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::of(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::of(ChatRole::Assistant, content)
    }

    fn of(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }
}

/// Token usage for one call, when the provider reports it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Complete response from one LLM call.
#[derive(Clone, Debug, Default)]
pub struct LlmReply {
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub usage: Option<LlmUsage>,
}

/// One streamed token.
#[derive(Clone, Debug)]
pub struct TokenChunk {
    pub token: String,
}

/// LLM errors. Transport and provider errors are candidates for the fallback provider.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm provider error ({status}): {message}")]
    Provider { status: u16, message: String },
    #[error("missing api key: set {0}")]
    MissingApiKey(String),
    #[error("llm response decode error: {0}")]
    Decode(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// Provider selection for one agent, with optional single-shot fallback.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Provider key, e.g. `openai`. Resolves the API key env var `<PROVIDER>_API_KEY`.
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Consulted once when the primary provider fails upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_provider: Option<Box<ProviderConfig>>,
}

impl ProviderConfig {
    pub fn openai(model: impl Into<String>) -> Self {
        Self {
            provider: "openai".to_string(),
            model: model.into(),
            api_key: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
            fallback_provider: None,
        }
    }

    /// Config for the in-process mock provider (tests, demos).
    pub fn mock() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "mock".to_string(),
            api_key: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
            fallback_provider: None,
        }
    }

    /// API key from config, else from `<PROVIDER>_API_KEY` in the environment.
    pub fn resolve_api_key(&self) -> Result<String, LlmError> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        let var = format!("{}_API_KEY", self.provider.to_uppercase().replace('-', "_"));
        std::env::var(&var).map_err(|_| LlmError::MissingApiKey(var))
    }
}

/// LLM client: given messages and tool specs, return assistant content and tool calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[crate::tools::ToolSpec],
    ) -> Result<LlmReply, LlmError>;

    /// Streaming variant. When `chunk_tx` is `Some`, implementations send tokens through
    /// the channel as they arrive. Default: call `invoke()` and send the content once.
    async fn invoke_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[crate::tools::ToolSpec],
        chunk_tx: Option<mpsc::Sender<TokenChunk>>,
    ) -> Result<LlmReply, LlmError> {
        let reply = self.invoke(messages, tools).await?;
        if let Some(tx) = chunk_tx {
            if !reply.content.is_empty() {
                let _ = tx
                    .send(TokenChunk {
                        token: reply.content.clone(),
                    })
                    .await;
            }
        }
        Ok(reply)
    }
}

/// Resolves a [`ProviderConfig`] into a client. Per-instance so tests and embedders can
/// swap providers without touching global state.
pub trait LlmClientFactory: Send + Sync {
    fn client_for(&self, config: &ProviderConfig) -> Result<Arc<dyn LlmClient>, LlmError>;
}

/// Built-in factory: `mock` for the in-process echo client, anything else is treated as
/// an OpenAI-compatible chat-completions endpoint.
#[derive(Default)]
pub struct DefaultLlmFactory;

impl LlmClientFactory for DefaultLlmFactory {
    fn client_for(&self, config: &ProviderConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
        if config.provider == "mock" {
            return Ok(Arc::new(MockLlm::echo()));
        }
        Ok(Arc::new(OpenAiChatClient::from_config(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: api key resolution prefers the inline key, then the provider env var.
    #[test]
    fn api_key_resolution_order() {
        let mut config = ProviderConfig::openai("gpt-4o-mini");
        config.provider = "parley-test-provider".to_string();
        assert!(matches!(
            config.resolve_api_key(),
            Err(LlmError::MissingApiKey(_))
        ));

        std::env::set_var("PARLEY_TEST_PROVIDER_API_KEY", "from-env");
        assert_eq!(config.resolve_api_key().unwrap(), "from-env");

        config.api_key = Some("inline".to_string());
        assert_eq!(config.resolve_api_key().unwrap(), "inline");
        std::env::remove_var("PARLEY_TEST_PROVIDER_API_KEY");
    }

    /// **Scenario**: fallback provider round-trips through serde with camelCase keys.
    #[test]
    fn provider_config_serde() {
        let raw = r#"{
            "provider": "openai", "model": "gpt-4o",
            "fallbackProvider": {"provider": "mock", "model": "mock"}
        }"#;
        let config: ProviderConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.fallback_provider.as_ref().unwrap().provider, "mock");
    }
}
