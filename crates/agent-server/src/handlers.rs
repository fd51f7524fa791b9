//! HTTP Handlers

use std::convert::Infallible;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;

use agent_core::{
    error::AgentError,
    gateway::{InvocationContext, InvocationRequest},
    normalizer::InvocationResponse,
};

use crate::state::AppState;

/// Session header set by the hosting runtime
pub const RUNTIME_SESSION_HEADER: &str = "x-amzn-bedrock-agentcore-runtime-session-id";
pub const SESSION_HEADER: &str = "x-session-id";
pub const USER_HEADER: &str = "x-user-id";

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn status_for(error: &AgentError) -> StatusCode {
    match error {
        AgentError::CredentialMissing(_) | AgentError::AgentConstruction(_) => StatusCode::SERVICE_UNAVAILABLE,
        AgentError::Parse(_) | AgentError::Json(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(error: &AgentError) -> ApiError {
    (
        status_for(error),
        Json(ErrorResponse {
            error: error.user_message(),
            code: error.code().into(),
        }),
    )
}

/// Liveness probe
pub async fn ping() -> Json<HealthResponse> {
    Json(HealthResponse { status: "Healthy" })
}

fn context(headers: &HeaderMap) -> InvocationContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    InvocationContext {
        session_id: header(RUNTIME_SESSION_HEADER).or_else(|| header(SESSION_HEADER)),
        user_id: header(USER_HEADER),
    }
}

/// Single invocation endpoint: JSON result or an SSE fragment stream.
///
/// Each SSE `data` field is the fragment as a JSON string, so line breaks
/// inside a fragment never collide with event framing.
pub async fn invocations(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "Rejected invocation body");
        api_error(&AgentError::Parse(format!("invalid JSON body: {e}")))
    })?;
    let request = InvocationRequest::from_payload(payload, &context(&headers)).map_err(|e| {
        tracing::warn!(error = %e, "Rejected invocation payload");
        api_error(&e)
    })?;

    match state.gateway.invoke(request).await {
        Ok(InvocationResponse::Complete(response)) => Ok(Json(response).into_response()),
        Ok(InvocationResponse::Stream(fragments)) => {
            let events = fragments.map(|fragment| {
                let event = match fragment {
                    Ok(text) => Event::default().json_data(&text),
                    Err(e) => Event::default().event("error").json_data(&e.user_message()),
                };
                Ok::<_, Infallible>(event.unwrap_or_else(|e| Event::default().event("error").data(e.to_string())))
            });
            Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
        }
        Err(e) => Err(api_error(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use agent_core::{
        agent::{AgentConfig, ModelAgentFactory},
        cache::SessionScope,
        credential::{AmbientCredentialSource, Credential, CredentialResolver, CredentialSource, EnvCredentialSource},
        gateway::{DEFAULT_PROMPT, Gateway},
        message::{Message, Role},
        normalizer::ResponseMode,
        provider::{
            Completion, CompletionStream, GenerationOptions, LlmProvider, ModelFactory, ProviderKind, StreamChunk,
        },
        registry::ToolRegistry,
        tool::Tool,
    };
    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::tools::AddNumbersTool;

    /// Answers "Echo:" followed by the latest user prompt
    struct Echo;

    impl Echo {
        fn prompt(messages: &[Message]) -> String {
            messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn health_check(&self) -> agent_core::Result<bool> {
            Ok(true)
        }

        async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> agent_core::Result<Completion> {
            Ok(Completion {
                content: format!("Echo:{}", Self::prompt(messages)),
                model: options.model.clone(),
                usage: None,
            })
        }

        async fn complete_stream(
            &self,
            messages: &[Message],
            _options: &GenerationOptions,
        ) -> agent_core::Result<CompletionStream> {
            let chunks = vec![
                Ok(StreamChunk::delta("Echo:")),
                Ok(StreamChunk::delta(Self::prompt(messages))),
                Ok(StreamChunk::done()),
            ];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    struct EchoModels;

    impl ModelFactory for EchoModels {
        fn build(&self, _credential: &Credential) -> agent_core::Result<Arc<dyn LlmProvider>> {
            Ok(Arc::new(Echo))
        }
    }

    fn state(source: impl CredentialSource + 'static, mode: ResponseMode, memory: bool) -> AppState {
        let local: Vec<Arc<dyn Tool>> = vec![Arc::new(AddNumbersTool)];
        let config = AgentConfig { memory, ..AgentConfig::default() };
        let scope = if memory { SessionScope::PerSession } else { SessionScope::Shared };
        let gateway = Gateway::new(
            Arc::new(CredentialResolver::new(source)),
            Arc::new(ToolRegistry::from_local(local)),
            Arc::new(ModelAgentFactory::new(Arc::new(EchoModels), config)),
        )
        .with_scope(scope)
        .with_mode(mode);
        AppState::new(gateway)
    }

    fn ambient(mode: ResponseMode) -> AppState {
        state(AmbientCredentialSource(ProviderKind::Ollama), mode, false)
    }

    fn invoke(body: &str) -> Request<Body> {
        Request::post("/invocations")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(state: AppState, request: Request<Body>) -> (StatusCode, HeaderMap, String) {
        let response = crate::app(state).oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn json_body(body: &str) -> Value {
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn ping_reports_healthy() {
        let request = Request::get("/ping").body(Body::empty()).unwrap();
        let (status, _, body) = send(ambient(ResponseMode::Single), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body), json!({"status": "Healthy"}));
    }

    #[tokio::test]
    async fn single_shot_returns_result() {
        let (status, _, body) = send(ambient(ResponseMode::Single), invoke(r#"{"prompt": "hi"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body), json!({"result": "Echo:hi"}));
    }

    #[tokio::test]
    async fn missing_prompt_uses_default() {
        let (_, _, body) = send(ambient(ResponseMode::Single), invoke(r#"{"user_id": "u1"}"#)).await;
        assert_eq!(json_body(&body)["result"], format!("Echo:{DEFAULT_PROMPT}"));
    }

    fn fragments(body: &str) -> Vec<String> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|data| serde_json::from_str(data.trim_start()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn streaming_sends_fragments_as_events() {
        let (status, headers, body) = send(ambient(ResponseMode::Stream), invoke(r#"{"prompt": "hi"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers["content-type"].to_str().unwrap().starts_with("text/event-stream"));

        let fragments = fragments(&body);
        assert_eq!(fragments, vec!["Echo:", "hi"]);
        assert_eq!(fragments.concat(), "Echo:hi");
    }

    #[tokio::test]
    async fn streamed_line_breaks_match_single_shot() {
        let request = || invoke(r#"{"prompt": "line1\r\nline2\n"}"#);

        let (_, _, single) = send(ambient(ResponseMode::Single), request()).await;
        let (_, _, stream) = send(ambient(ResponseMode::Stream), request()).await;

        assert!(!stream.contains('\r'));
        let fragments = fragments(&stream);
        assert_eq!(fragments, vec!["Echo:", "line1\r\nline2\n"]);
        assert_eq!(json_body(&single)["result"], fragments.concat());
    }

    #[tokio::test]
    async fn malformed_bodies_are_bad_requests() {
        for body in ["not json", r#""just a string""#, r#"{"prompt": 42}"#] {
            let (status, _, response) = send(ambient(ResponseMode::Single), invoke(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(json_body(&response)["code"], "BAD_REQUEST");
        }
    }

    #[tokio::test]
    async fn missing_credential_is_unavailable() {
        let source = EnvCredentialSource::with_lookup(ProviderKind::Anthropic, "ANTHROPIC_API_KEY", |_| None);
        let (status, _, body) = send(state(source, ResponseMode::Single, false), invoke("{}")).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(&body);
        assert_eq!(body["code"], "CREDENTIAL_MISSING");
        assert!(body["error"].as_str().unwrap().contains("ANTHROPIC_API_KEY"));
    }

    #[tokio::test]
    async fn session_header_selects_cached_agent() {
        let state = state(AmbientCredentialSource(ProviderKind::Ollama), ResponseMode::Single, true);
        let with_session = |id: &str| {
            Request::post("/invocations")
                .header(SESSION_HEADER, id)
                .body(Body::from(r#"{"prompt": "hi", "user_id": "u1"}"#))
                .unwrap()
        };

        send(state.clone(), with_session("s1")).await;
        send(state.clone(), with_session("s1")).await;
        assert_eq!(state.gateway.cache().len(), 1);

        send(state.clone(), with_session("s2")).await;
        assert_eq!(state.gateway.cache().len(), 2);
    }
}
