//! Provider selection
//!
//! Maps the configured [`ProviderKind`] to a concrete [`LlmProvider`] built
//! from the resolved credential.

use std::sync::Arc;

use agent_core::{
    credential::Credential,
    error::{AgentError, Result},
    provider::{LlmProvider, ModelFactory, ProviderKind},
};

use crate::anthropic::AnthropicProvider;
use crate::config::{OllamaConfig, RuntimeConfig};
use crate::openai::OpenAiProvider;

pub struct ProviderModelFactory {
    kind: ProviderKind,
    ollama: OllamaConfig,
}

impl ProviderModelFactory {
    pub const fn new(kind: ProviderKind, ollama: OllamaConfig) -> Self {
        Self { kind, ollama }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.provider, config.ollama.clone())
    }
}

impl ModelFactory for ProviderModelFactory {
    fn build(&self, credential: &Credential) -> Result<Arc<dyn LlmProvider>> {
        if credential.provider() != self.kind {
            return Err(AgentError::AgentConstruction(format!(
                "credential is for {}, model provider is {}",
                credential.provider(),
                self.kind
            )));
        }

        let provider: Arc<dyn LlmProvider> = match self.kind {
            ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(credential.require_api_key()?)),
            ProviderKind::OpenAi => Arc::new(OpenAiProvider::openai(credential.require_api_key()?)),
            ProviderKind::Gemini => Arc::new(OpenAiProvider::gemini(credential.require_api_key()?)),
            ProviderKind::Ollama => ollama(&self.ollama)?,
        };
        Ok(provider)
    }
}

#[cfg(feature = "ollama")]
fn ollama(config: &OllamaConfig) -> Result<Arc<dyn LlmProvider>> {
    Ok(Arc::new(crate::ollama::OllamaProvider::from_config(config.clone())))
}

#[cfg(not(feature = "ollama"))]
fn ollama(_config: &OllamaConfig) -> Result<Arc<dyn LlmProvider>> {
    Err(AgentError::AgentConstruction("built without the 'ollama' feature".into()))
}
