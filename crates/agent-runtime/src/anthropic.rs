//! Anthropic Messages API provider

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

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    /// System prompt goes top-level; tool results ride in user turns
    fn build_body(messages: &[Message], options: &GenerationOptions, stream: bool) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = if m.role == Role::Assistant { "assistant" } else { "user" };
                json!({"role": role, "content": m.content})
            })
            .collect();

        let mut body = json!({
            "model": options.model,
            "messages": turns,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if !options.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(options.stop_sequences);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(format!("anthropic: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Provider(format!("anthropic returned {status}: {text}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .send()
            .await;
        Ok(response.is_ok_and(|r| r.status().is_success()))
    }

    async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
        let response = self.send(&Self::build_body(messages, options, false)).await?;
        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("anthropic response: {e}")))?;

        let content = body
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();
        Ok(Completion {
            content,
            model: body.model,
            usage: Some(TokenUsage {
                prompt_tokens: body.usage.input_tokens,
                completion_tokens: body.usage.output_tokens,
            }),
        })
    }

    async fn complete_stream(&self, messages: &[Message], options: &GenerationOptions) -> Result<CompletionStream> {
        let response = self.send(&Self::build_body(messages, options, true)).await?;
        let events = sse::data_lines(response.bytes_stream());

        let chunks = events.filter_map(|line| async move {
            match line {
                Ok(data) => parse_event(&data).transpose(),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(chunks))
    }
}

/// Map one stream event to a chunk; `None` for events that carry no text
fn parse_event(data: &str) -> Result<Option<StreamChunk>> {
    let event: StreamEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(_) => return Ok(None),
    };
    match event.kind.as_str() {
        "content_block_delta" => Ok(event
            .delta
            .filter(|d| d.kind.as_deref() == Some("text_delta"))
            .and_then(|d| d.text)
            .map(StreamChunk::delta)),
        "message_stop" => Ok(Some(StreamChunk::done())),
        "error" => Err(AgentError::Provider(format!(
            "anthropic stream error: {}",
            event.error.map(|e| e.message).unwrap_or_default()
        ))),
        _ => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<StreamDelta>,
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::header, response::IntoResponse, routing::post};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    #[test]
    fn system_prompt_is_lifted_out_of_turns() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::tool("[Tool 'x' returned]\n1", None),
        ];
        let body = AnthropicProvider::build_body(&messages, &GenerationOptions::for_model("claude"), true);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
        assert_eq!(body["messages"][2]["role"], "user");
        assert_eq!(body["stream"], true);
    }

    #[tokio::test]
    async fn streams_text_deltas() {
        let events = concat!(
            "event: message_start\ndata: {\"type\":\"message_start\"}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: ping\ndata: {\"type\":\"ping\"}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        );
        let router = Router::new().route(
            "/v1/messages",
            post(move || async move { ([(header::CONTENT_TYPE, "text/event-stream")], events).into_response() }),
        );
        let provider = AnthropicProvider::with_base_url("k", serve(router).await);

        let chunks: Vec<StreamChunk> = provider
            .complete_stream(&[Message::user("hi")], &GenerationOptions::for_model("claude"))
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        let text: String = chunks.iter().map(|c| c.delta.as_str()).collect();
        assert_eq!(text, "Hello");
        assert!(chunks.last().unwrap().done);
    }

    #[tokio::test]
    async fn completes_with_text_blocks() {
        let router = Router::new().route(
            "/v1/messages",
            post(|| async {
                Json(json!({
                    "model": "claude",
                    "content": [{"type": "text", "text": "Hi"}, {"type": "text", "text": " there"}],
                    "usage": {"input_tokens": 3, "output_tokens": 2}
                }))
            }),
        );
        let provider = AnthropicProvider::with_base_url("k", serve(router).await);
        let completion = provider
            .complete(&[Message::user("hi")], &GenerationOptions::for_model("claude"))
            .await
            .unwrap();
        assert_eq!(completion.content, "Hi there");
        assert_eq!(completion.usage.unwrap().completion_tokens, 2);
    }
}
