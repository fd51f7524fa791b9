//! OpenAI-compatible chat completions provider
//!
//! Serves OpenAI directly and Gemini through its OpenAI-compatible endpoint.

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, CompletionStream, GenerationOptions, LlmProvider, StreamChunk, TokenUsage},
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::sse;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

pub struct OpenAiProvider {
    client: Client,
    name: &'static str,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::compatible("openai", api_key, OPENAI_BASE_URL)
    }

    pub fn gemini(api_key: impl Into<String>) -> Self {
        Self::compatible("gemini", api_key, GEMINI_BASE_URL)
    }

    /// Any endpoint speaking the chat completions dialect
    pub fn compatible(name: &'static str, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            name,
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn build_body(messages: &[Message], options: &GenerationOptions, stream: bool) -> Value {
        let turns: Vec<Value> = messages
            .iter()
            .map(|m| {
                // text protocol: tool results are user-visible context
                let role = match m.role {
                    Role::System => "system",
                    Role::Assistant => "assistant",
                    Role::User | Role::Tool => "user",
                };
                json!({"role": role, "content": m.content})
            })
            .collect();

        let mut body = json!({
            "model": options.model,
            "messages": turns,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });
        if !options.stop_sequences.is_empty() {
            body["stop"] = json!(options.stop_sequences);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(format!("{}: {e}", self.name)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Provider(format!("{} returned {status}: {text}", self.name)));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await;
        Ok(response.is_ok_and(|r| r.status().is_success()))
    }

    async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
        let response = self.send(&Self::build_body(messages, options, false)).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("{} response: {e}", self.name)))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Provider(format!("{} returned no choices", self.name)))?;
        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            model: body.model.unwrap_or_else(|| options.model.clone()),
            usage: body.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }

    async fn complete_stream(&self, messages: &[Message], options: &GenerationOptions) -> Result<CompletionStream> {
        let response = self.send(&Self::build_body(messages, options, true)).await?;
        let chunks = sse::data_lines(response.bytes_stream()).filter_map(|line| async move {
            match line {
                Ok(data) => parse_chunk(&data),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(chunks))
    }
}

fn parse_chunk(data: &str) -> Option<Result<StreamChunk>> {
    if data.trim() == "[DONE]" {
        return Some(Ok(StreamChunk::done()));
    }
    let chunk: ChunkResponse = serde_json::from_str(data).ok()?;
    let choice = chunk.choices.into_iter().next()?;
    choice
        .delta
        .content
        .filter(|text| !text.is_empty())
        .map(|text| Ok(StreamChunk::delta(text)))
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}
