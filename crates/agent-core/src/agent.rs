//! Agent
//!
//! A model handle bound to a tool set, running a bounded ReAct loop: the model
//! either answers or asks for a tool, the tool result is fed back, repeat.
//!
//! A turn is a tool call iff its text, ignoring leading whitespace, opens with
//! a ```` ```tool ```` fence. The streaming path uses the same rule, holding
//! back the start of each turn until it can tell, so tool turns are never
//! forwarded and the final answer streams through byte for byte.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::cache::SessionKey;
use crate::credential::Credential;
use crate::error::{AgentError, Result};
use crate::message::{Conversation, Message};
use crate::normalizer::{OrchestrationOutput, ResponseMode, ResponseUnit, UnitStream};
use crate::provider::{GenerationOptions, LlmProvider, ModelFactory};
use crate::tool::{ToolCall, ToolResult, ToolSet};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use tools when appropriate.";

const TOOL_FENCE: &str = "```tool";

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub name: String,

    pub system_prompt: String,

    /// Maximum reasoning iterations before giving up
    pub max_iterations: usize,

    pub generation: GenerationOptions,

    /// Keep conversation history across invocations
    pub memory: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "agent".into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_iterations: 10,
            generation: GenerationOptions::default(),
            memory: false,
        }
    }
}

/// A constructed, ready-to-invoke agent
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    tools: ToolSet,
    config: AgentConfig,
    memory: Option<Arc<Mutex<Conversation>>>,
}

impl Agent {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: ToolSet, config: AgentConfig) -> Self {
        let memory = config.memory.then(|| Arc::new(Mutex::new(Conversation::new())));
        Self {
            provider,
            tools,
            config,
            memory,
        }
    }

    pub const fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Snapshot of the session-bound history (empty without memory)
    pub async fn history(&self) -> Conversation {
        match &self.memory {
            Some(memory) => memory.lock().await.clone(),
            None => Conversation::new(),
        }
    }

    /// Run the orchestration call in the requested mode
    pub async fn invoke(self: Arc<Self>, prompt: String, mode: ResponseMode) -> Result<OrchestrationOutput> {
        match mode {
            ResponseMode::Single => self.run(&prompt).await.map(OrchestrationOutput::Single),
            ResponseMode::Stream => Ok(OrchestrationOutput::Stream(self.stream(prompt))),
        }
    }

    /// Answer a prompt, returning the final text
    pub async fn run(&self, prompt: &str) -> Result<String> {
        let mut conversation = self.conversation().await;
        conversation.push(Message::user(prompt));

        for _ in 0..self.config.max_iterations {
            let completion = self
                .provider
                .complete(conversation.messages(), &self.config.generation)
                .await?;
            let content = completion.content;
            conversation.push(Message::assistant(&content));

            match parse_tool_call(&content) {
                Some(call) => self.call_tool(&mut conversation, call).await,
                None => return Ok(content),
            }
        }

        Err(AgentError::MaxIterations(self.config.max_iterations))
    }

    /// Answer a prompt as a stream of units
    pub fn stream(self: Arc<Self>, prompt: String) -> UnitStream {
        Box::pin(self.units(prompt))
    }

    fn units(self: Arc<Self>, prompt: String) -> impl Stream<Item = Result<ResponseUnit>> + Send {
        async_stream::try_stream! {
            let mut conversation = self.conversation().await;
            conversation.push(Message::user(prompt));
            let mut answered = false;

            for _ in 0..self.config.max_iterations {
                let mut chunks = self
                    .provider
                    .complete_stream(conversation.messages(), &self.config.generation)
                    .await?;

                let mut gate = TurnGate::default();
                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk?;
                    if let Some(text) = gate.push(&chunk.delta) {
                        yield ResponseUnit::Text(text);
                    }
                    if chunk.done {
                        break;
                    }
                }

                let (content, decided) = gate.finish();
                conversation.push(Message::assistant(&content));

                let call = if decided == Gate::Tool { parse_tool_call(&content) } else { None };
                if let Some(call) = call {
                    yield ResponseUnit::ToolUse { name: call.name.clone() };
                    self.call_tool(&mut conversation, call).await;
                    continue;
                }

                if decided != Gate::Text && !content.is_empty() {
                    yield ResponseUnit::Text(content);
                }
                answered = true;
                break;
            }

            if !answered {
                Err::<(), _>(AgentError::MaxIterations(self.config.max_iterations))?;
            }
        }
    }

    async fn call_tool(&self, conversation: &mut Conversation, mut call: ToolCall) {
        let id = call.id.get_or_insert_with(|| uuid::Uuid::new_v4().to_string()).clone();
        tracing::debug!(tool = %call.name, "Executing tool");

        let result = match self.tools.execute(&call).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool call failed");
                ToolResult::failure(&call.name, format!("Error: {e}"))
            }
        };

        conversation.push(Message::tool(format_tool_result(&result), Some(id)));
    }

    fn system_prompt(&self) -> String {
        let mut prompt = self.config.system_prompt.clone();
        if !self.tools.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&self.tools.prompt_section());
        }
        prompt
    }

    async fn conversation(&self) -> ConversationHandle {
        match &self.memory {
            Some(memory) => {
                let mut guard = Arc::clone(memory).lock_owned().await;
                if !guard.has_system_prompt() {
                    guard.push(Message::system(self.system_prompt()));
                }
                ConversationHandle::Bound(guard)
            }
            None => ConversationHandle::Fresh(Conversation::with_system_prompt(self.system_prompt())),
        }
    }
}

/// Conversation for one invocation: fresh, or the locked session memory
enum ConversationHandle {
    Fresh(Conversation),
    Bound(OwnedMutexGuard<Conversation>),
}

impl Deref for ConversationHandle {
    type Target = Conversation;

    fn deref(&self) -> &Conversation {
        match self {
            Self::Fresh(c) => c,
            Self::Bound(g) => g,
        }
    }
}

impl DerefMut for ConversationHandle {
    fn deref_mut(&mut self) -> &mut Conversation {
        match self {
            Self::Fresh(c) => c,
            Self::Bound(g) => g,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Gate {
    #[default]
    Undecided,
    Text,
    Tool,
}

/// Decides, as text arrives, whether a streamed turn is a tool call
#[derive(Default)]
struct TurnGate {
    content: String,
    gate: Gate,
}

impl TurnGate {
    /// Feed a delta; returns text that is safe to forward now
    fn push(&mut self, delta: &str) -> Option<String> {
        self.content.push_str(delta);
        match self.gate {
            Gate::Text => (!delta.is_empty()).then(|| delta.to_string()),
            Gate::Tool => None,
            Gate::Undecided => {
                let head = self.content.trim_start();
                if head.starts_with(TOOL_FENCE) {
                    self.gate = Gate::Tool;
                    None
                } else if head.is_empty() || TOOL_FENCE.starts_with(head) {
                    None
                } else {
                    self.gate = Gate::Text;
                    Some(self.content.clone())
                }
            }
        }
    }

    fn finish(self) -> (String, Gate) {
        (self.content, self.gate)
    }
}

/// Parse a tool call from a model turn
fn parse_tool_call(content: &str) -> Option<ToolCall> {
    let body = content.trim_start().strip_prefix(TOOL_FENCE)?;
    let end = body.find("```")?;
    serde_json::from_str::<ToolCall>(body[..end].trim()).ok()
}

fn format_tool_result(result: &ToolResult) -> String {
    if result.success {
        format!("[Tool '{}' returned]\n{}", result.name, result.output)
    } else {
        format!("[Tool '{}' failed]\n{}", result.name, result.output)
    }
}

/// Builds agents for cache misses
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn build(&self, key: &SessionKey, credential: Arc<Credential>, tools: ToolSet) -> Result<Agent>;
}

/// Factory that binds a model from the resolved credential
pub struct ModelAgentFactory {
    models: Arc<dyn ModelFactory>,
    config: AgentConfig,
}

impl ModelAgentFactory {
    pub fn new(models: Arc<dyn ModelFactory>, config: AgentConfig) -> Self {
        Self { models, config }
    }
}

#[async_trait]
impl AgentFactory for ModelAgentFactory {
    async fn build(&self, key: &SessionKey, credential: Arc<Credential>, tools: ToolSet) -> Result<Agent> {
        let provider = self.models.build(&credential).map_err(|e| match e {
            e @ AgentError::AgentConstruction(_) => e,
            other => AgentError::AgentConstruction(other.to_string()),
        })?;

        tracing::info!(
            key = %key,
            agent = %self.config.name,
            provider = provider.name(),
            tools = tools.len(),
            memory = self.config.memory,
            "Agent constructed"
        );
        Ok(Agent::new(provider, tools, self.config.clone()))
    }
}
