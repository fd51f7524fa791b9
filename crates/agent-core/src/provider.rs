//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for all model providers so one agent
//! implementation serves every deployment variant. The concrete provider is
//! chosen once at startup from a [`ProviderKind`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{GenerationOptions, LlmProvider};
//!
//! let completion = provider.complete(&messages, &GenerationOptions::default()).await?;
//! ```

use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::error::{AgentError, Result};
use crate::message::Message;

/// Model provider selection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
    /// Local inference; uses ambient credentials (no API key)
    Ollama,
}

impl ProviderKind {
    /// Default model identifier for this provider
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-5-20250929",
            Self::OpenAi => "gpt-4.1",
            Self::Gemini => "gemini-2.5-flash",
            Self::Ollama => "llama3.2",
        }
    }

    /// Whether the provider needs an API key resolved before first use
    pub const fn requires_api_key(self) -> bool {
        !matches!(self, Self::Ollama)
    }

    /// Environment variable that carries the raw key in local development
    pub const fn default_key_var(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::Ollama => "",
        }
    }

    /// Provider name presented to the identity broker
    pub const fn default_identity_provider(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic-api-key",
            Self::OpenAi => "openai-api-key",
            Self::Gemini => "gemini-api-key",
            Self::Ollama => "",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(AgentError::Config(format!("unknown model provider '{other}'"))),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "llama3.2", "gpt-4.1", "claude-sonnet-4-5")
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

const fn default_temperature() -> f32 { 0.7 }
const fn default_max_tokens() -> u32 { 4096 }

impl GenerationOptions {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: ProviderKind::Ollama.default_model().into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stop_sequences: Vec::new(),
        }
    }
}

/// Response from an LLM completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,

    /// Model that generated this response
    pub model: String,

    pub usage: Option<TokenUsage>,
}

/// Token usage statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A chunk from streaming completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamChunk {
    /// The text delta
    pub delta: String,

    /// Whether this is the final chunk
    pub done: bool,
}

impl StreamChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self { delta: text.into(), done: false }
    }

    pub fn done() -> Self {
        Self { delta: String::new(), done: true }
    }
}

/// Stream type for completion streaming
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new model backends.
/// The agent works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs and health output
    fn name(&self) -> &str;

    /// Check if the provider is reachable and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Generate a completion from messages
    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion>;

    /// Generate a streaming completion
    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<CompletionStream>;
}

/// Builds an authenticated provider client from a resolved credential
pub trait ModelFactory: Send + Sync {
    fn build(&self, credential: &Credential) -> Result<Arc<dyn LlmProvider>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_names() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!(" gemini ".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert!(matches!(
            "bedrock".parse::<ProviderKind>(),
            Err(AgentError::Config(_))
        ));
    }

    #[test]
    fn only_ollama_is_keyless() {
        assert!(!ProviderKind::Ollama.requires_api_key());
        assert!(ProviderKind::Anthropic.requires_api_key());
        assert_eq!(ProviderKind::Gemini.default_key_var(), "GEMINI_API_KEY");
    }
}
