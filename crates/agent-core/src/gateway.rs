//! Entry Gateway
//!
//! Drives one invocation through the runtime:
//!
//! ```text
//! Idle ─▶ CredentialResolving ─▶ AgentResolving ─▶ Invoking ─▶ Responding ─▶ Idle
//!               │                      │               │
//!               └──────────────────────┴───────────────┴──▶ Failed (this request only)
//! ```
//!
//! The gateway holds no per-request state of its own; it delegates to the
//! shared credential resolver and agent cache.

use std::sync::Arc;

use serde_json::Value;
use tracing::Instrument;

use crate::agent::{Agent, AgentFactory};
use crate::cache::{AgentCache, SessionKey, SessionScope};
use crate::credential::CredentialResolver;
use crate::error::{AgentError, Result};
use crate::normalizer::{InvocationResponse, ResponseMode, normalize};
use crate::registry::ToolRegistry;

pub const DEFAULT_PROMPT: &str = "What can you help me with?";

/// Ambient per-call context supplied by the hosting surface
#[derive(Clone, Debug, Default)]
pub struct InvocationContext {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

/// One external call
#[derive(Clone, Debug)]
pub struct InvocationRequest {
    pub prompt: String,
    pub key: SessionKey,
    /// The raw payload, including fields the runtime ignores
    pub payload: Value,
}

impl InvocationRequest {
    pub fn new(prompt: impl Into<String>, key: SessionKey) -> Self {
        Self {
            prompt: prompt.into(),
            key,
            payload: Value::Object(serde_json::Map::new()),
        }
    }

    /// Interpret a JSON payload plus ambient context.
    ///
    /// `user_id` prefers the payload; `session_id` prefers the context.
    pub fn from_payload(payload: Value, context: &InvocationContext) -> Result<Self> {
        let Value::Object(fields) = &payload else {
            return Err(AgentError::Parse("payload must be a JSON object".into()));
        };

        let prompt = match fields.get("prompt") {
            None | Some(Value::Null) => DEFAULT_PROMPT.to_string(),
            Some(Value::String(prompt)) => prompt.clone(),
            Some(_) => return Err(AgentError::Parse("'prompt' must be a string".into())),
        };

        let field = |name: &str| fields.get(name).and_then(Value::as_str);
        let user_id = field("user_id").or(context.user_id.as_deref());
        let session_id = context.session_id.as_deref().or_else(|| field("session_id"));

        Ok(Self {
            prompt,
            key: SessionKey::from_parts(session_id, user_id),
            payload,
        })
    }
}

/// Invocation lifecycle, logged per request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvocationState {
    Idle,
    CredentialResolving,
    AgentResolving,
    Invoking,
    Responding,
    Failed,
}

pub struct Gateway {
    credentials: Arc<CredentialResolver>,
    registry: Arc<ToolRegistry>,
    cache: Arc<AgentCache<Agent>>,
    factory: Arc<dyn AgentFactory>,
    scope: SessionScope,
    mode: ResponseMode,
}

impl Gateway {
    pub fn new(
        credentials: Arc<CredentialResolver>,
        registry: Arc<ToolRegistry>,
        factory: Arc<dyn AgentFactory>,
    ) -> Self {
        Self {
            credentials,
            registry,
            cache: Arc::new(AgentCache::new()),
            factory,
            scope: SessionScope::default(),
            mode: ResponseMode::default(),
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: SessionScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }

    pub const fn mode(&self) -> ResponseMode {
        self.mode
    }

    pub const fn scope(&self) -> SessionScope {
        self.scope
    }

    pub fn credentials(&self) -> &CredentialResolver {
        &self.credentials
    }

    pub fn cache(&self) -> &AgentCache<Agent> {
        &self.cache
    }

    /// Handle one invocation
    pub async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResponse> {
        let span = tracing::info_span!(
            "invocation",
            session_id = %request.key.session_id,
            user_id = %request.key.user_id,
        );
        async move {
            tracing::info!("Invoking agent");
            let result = self.drive(request).await;
            match &result {
                Ok(_) => transition(InvocationState::Idle),
                Err(e) => {
                    transition(InvocationState::Failed);
                    tracing::error!(error = %e, code = e.code(), "Invocation failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, request: InvocationRequest) -> Result<InvocationResponse> {
        transition(InvocationState::CredentialResolving);
        let credential = self.credentials.resolve().await?;

        transition(InvocationState::AgentResolving);
        let key = self.scope.key_for(&request.key);
        let agent = self
            .cache
            .get_or_create(&key, || async {
                let tools = self.registry.build_tool_set().await;
                self.factory.build(&key, credential, tools).await
            })
            .await?;

        transition(InvocationState::Invoking);
        let output = agent
            .invoke(request.prompt, self.mode)
            .await
            .map_err(AgentError::into_invocation)?;

        transition(InvocationState::Responding);
        Ok(normalize(output))
    }
}

fn transition(state: InvocationState) {
    tracing::debug!(state = ?state, "Invocation state");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::{AddNumbers, Scripted};
    use crate::agent::{AgentConfig, ModelAgentFactory};
    use crate::credential::{
        AmbientCredentialSource, Credential, CredentialSource, CredentialState, EnvCredentialSource,
    };
    use crate::provider::{LlmProvider, ModelFactory, ProviderKind};
    use crate::tool::Tool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        provider: Arc<Scripted>,
        builds: AtomicUsize,
    }

    impl ModelFactory for Fixed {
        fn build(&self, _credential: &Credential) -> Result<Arc<dyn LlmProvider>> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(self.provider.clone())
        }
    }

    struct Broken;

    impl ModelFactory for Broken {
        fn build(&self, _credential: &Credential) -> Result<Arc<dyn LlmProvider>> {
            Err(AgentError::Config("no client".into()))
        }
    }

    fn gateway(
        source: impl CredentialSource + 'static,
        models: Arc<dyn ModelFactory>,
        config: AgentConfig,
    ) -> Gateway {
        let local: Vec<Arc<dyn Tool>> = vec![Arc::new(AddNumbers)];
        Gateway::new(
            Arc::new(CredentialResolver::new(source)),
            Arc::new(ToolRegistry::from_local(local)),
            Arc::new(ModelAgentFactory::new(models, config)),
        )
    }

    fn fixed(turns: Vec<Vec<&'static str>>) -> (Arc<Fixed>, Arc<Scripted>) {
        let provider = Arc::new(Scripted::new(turns));
        (Arc::new(Fixed { provider: provider.clone(), builds: AtomicUsize::new(0) }), provider)
    }

    #[test]
    fn missing_prompt_uses_default() {
        let request = InvocationRequest::from_payload(json!({"other": 1}), &InvocationContext::default()).unwrap();
        assert_eq!(request.prompt, DEFAULT_PROMPT);
        assert_eq!(request.key, SessionKey::from_parts(None, None));
    }

    #[test]
    fn identifiers_follow_precedence() {
        let context = InvocationContext {
            session_id: Some("ctx-session".into()),
            user_id: Some("ctx-user".into()),
        };
        let request = InvocationRequest::from_payload(
            json!({"prompt": "hi", "user_id": "payload-user", "session_id": "payload-session"}),
            &context,
        )
        .unwrap();
        assert_eq!(request.key, SessionKey::new("ctx-session", "payload-user"));
    }

    #[test]
    fn rejects_non_object_payloads() {
        let ctx = InvocationContext::default();
        assert!(matches!(InvocationRequest::from_payload(json!("hi"), &ctx), Err(AgentError::Parse(_))));
        assert!(matches!(InvocationRequest::from_payload(json!({"prompt": 3}), &ctx), Err(AgentError::Parse(_))));
    }

    #[tokio::test]
    async fn default_prompt_reaches_the_model() {
        let (models, provider) = fixed(vec![vec!["I can add numbers."]]);
        let gw = gateway(AmbientCredentialSource(ProviderKind::Ollama), models, AgentConfig::default());

        let request = InvocationRequest::from_payload(json!({}), &InvocationContext::default()).unwrap();
        let response = gw.invoke(request).await.unwrap().into_complete().await.unwrap();

        assert_eq!(response.result, "I can add numbers.");
        let seen = provider.seen.lock();
        assert_eq!(seen[0].last().unwrap().content, DEFAULT_PROMPT);
    }

    #[tokio::test]
    async fn missing_credential_stops_before_orchestration() {
        let (models, provider) = fixed(vec![vec!["unused"]]);
        let source = EnvCredentialSource::with_lookup(ProviderKind::OpenAi, "OPENAI_API_KEY", |_| None);
        let gw = gateway(source, models.clone(), AgentConfig::default());

        let err = gw.invoke(InvocationRequest::new("hi", SessionKey::shared())).await.unwrap_err();

        assert!(matches!(err, AgentError::CredentialMissing(ref m) if m.contains("OPENAI_API_KEY")));
        assert_eq!(gw.credentials().state(), CredentialState::Failed);
        assert_eq!(models.builds.load(Ordering::SeqCst), 0);
        assert!(provider.seen.lock().is_empty());
        assert!(gw.cache().is_empty());
    }

    #[tokio::test]
    async fn shared_scope_reuses_one_agent() {
        let (models, _provider) = fixed(vec![vec!["a"], vec!["b"]]);
        let gw = gateway(AmbientCredentialSource(ProviderKind::Ollama), models.clone(), AgentConfig::default());

        gw.invoke(InvocationRequest::new("1", SessionKey::new("s1", "u1"))).await.unwrap();
        gw.invoke(InvocationRequest::new("2", SessionKey::new("s2", "u2"))).await.unwrap();

        assert_eq!(models.builds.load(Ordering::SeqCst), 1);
        assert!(gw.cache().contains(&SessionKey::shared()));
    }

    #[tokio::test]
    async fn per_session_scope_builds_per_key() {
        let (models, _provider) = fixed(vec![vec!["a"], vec!["b"], vec!["c"]]);
        let config = AgentConfig { memory: true, ..AgentConfig::default() };
        let gw = gateway(AmbientCredentialSource(ProviderKind::Ollama), models.clone(), config)
            .with_scope(SessionScope::PerSession);

        gw.invoke(InvocationRequest::new("1", SessionKey::new("s1", "u1"))).await.unwrap();
        gw.invoke(InvocationRequest::new("2", SessionKey::new("s1", "u1"))).await.unwrap();
        gw.invoke(InvocationRequest::new("3", SessionKey::new("s2", "u1"))).await.unwrap();

        assert_eq!(models.builds.load(Ordering::SeqCst), 2);
        let agent = gw.cache().get(&SessionKey::new("s1", "u1")).unwrap();
        assert_eq!(agent.history().await.count(crate::message::Role::User), 2);
    }

    #[tokio::test]
    async fn construction_failure_is_retried_next_request() {
        let gw = gateway(AmbientCredentialSource(ProviderKind::Ollama), Arc::new(Broken), AgentConfig::default());

        for _ in 0..2 {
            let err = gw.invoke(InvocationRequest::new("hi", SessionKey::shared())).await.unwrap_err();
            assert!(matches!(err, AgentError::AgentConstruction(_)));
            assert_eq!(err.code(), "AGENT_CONSTRUCTION_FAILED");
        }
        assert!(gw.cache().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_surfaces_as_invocation_error() {
        let (models, _provider) = fixed(vec![]);
        let gw = gateway(AmbientCredentialSource(ProviderKind::Ollama), models, AgentConfig::default());

        let err = gw.invoke(InvocationRequest::new("hi", SessionKey::shared())).await.unwrap_err();
        assert!(matches!(err, AgentError::Invocation(ref m) if m.contains("script exhausted")));

        // the agent itself stays cached
        assert_eq!(gw.cache().len(), 1);
    }

    #[tokio::test]
    async fn streaming_mode_streams_fragments() {
        let (models, _provider) = fixed(vec![vec!["Hel", "lo"]]);
        let gw = gateway(AmbientCredentialSource(ProviderKind::Ollama), models, AgentConfig::default())
            .with_mode(ResponseMode::Stream);

        let response = gw.invoke(InvocationRequest::new("hi", SessionKey::shared())).await.unwrap();
        assert!(matches!(response, InvocationResponse::Stream(_)));
        assert_eq!(response.into_complete().await.unwrap().result, "Hello");
    }

    struct Keyed;

    #[async_trait]
    impl CredentialSource for Keyed {
        fn describe(&self) -> String {
            "keyed".into()
        }

        async fn fetch(&self) -> Result<Credential> {
            Ok(Credential::with_key(
                ProviderKind::Anthropic,
                "k",
                crate::credential::CredentialOrigin::IdentityBroker,
            ))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_invocations_share_one_agent() {
        let (models, _provider) = fixed((0..16).map(|_| vec!["ok"]).collect());
        let gw = Arc::new(
            gateway(Keyed, models.clone(), AgentConfig::default()).with_scope(SessionScope::PerSession),
        );

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let gw = gw.clone();
                tokio::spawn(async move { gw.invoke(InvocationRequest::new("hi", SessionKey::new("s", "u"))).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(models.builds.load(Ordering::SeqCst), 1);
    }
}
