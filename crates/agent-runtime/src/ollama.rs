//! Ollama LLM Provider
//!
//! Local inference; authenticates ambiently, so it is built from a key-less
//! credential.

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, CompletionStream, GenerationOptions, LlmProvider, StreamChunk},
};
use async_trait::async_trait;
use futures::StreamExt;
use ollama_rs::{
    Ollama,
    generation::chat::{ChatMessage, MessageRole, request::ChatMessageRequest},
};

use crate::config::OllamaConfig;

pub struct OllamaProvider {
    client: Ollama,
    config: OllamaConfig,
}

impl OllamaProvider {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
            ..OllamaConfig::default()
        })
    }

    pub fn from_config(config: OllamaConfig) -> Self {
        Self {
            client: Ollama::new(config.host.clone(), config.port),
            config,
        }
    }

    pub fn localhost() -> Self {
        Self::from_config(OllamaConfig::default())
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => MessageRole::System,
                    Role::User => MessageRole::User,
                    Role::Assistant => MessageRole::Assistant,
                    Role::Tool => MessageRole::User, // Tools appear as user context
                };
                ChatMessage::new(role, m.content.clone())
            })
            .collect()
    }

    fn request(messages: &[Message], options: &GenerationOptions) -> ChatMessageRequest {
        ChatMessageRequest::new(options.model.clone(), Self::convert_messages(messages))
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint(), error = %e, "Ollama health check failed");
                Ok(false)
            }
        }
    }

    async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
        let response = self
            .client
            .send_chat_messages(Self::request(messages, options))
            .await
            .map_err(|e| AgentError::Provider(format!("ollama: {e}")))?;

        Ok(Completion {
            content: response.message.content,
            model: options.model.clone(),
            usage: None,
        })
    }

    async fn complete_stream(&self, messages: &[Message], options: &GenerationOptions) -> Result<CompletionStream> {
        let stream = self
            .client
            .send_chat_messages_stream(Self::request(messages, options))
            .await
            .map_err(|e| AgentError::Provider(format!("ollama: {e}")))?;

        // stream end marks the end of the turn
        let mapped = stream.map(|item| {
            item.map(|chunk| StreamChunk::delta(chunk.message.content))
                .map_err(|_| AgentError::Provider("ollama stream interrupted".into()))
        });
        Ok(Box::pin(mapped))
    }
}
