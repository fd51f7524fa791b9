//! # agent-core
//!
//! Framework-agnostic adapter that hosts a tool-using agent behind one
//! invocation endpoint.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Gateway                               │
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────────────┐ │
//! │  │  Credential  │──▶│ AgentCache   │──▶│  Agent (ReAct loop)   │ │
//! │  │  Resolver    │   │ (per session)│   │  LlmProvider + tools  │ │
//! │  └──────────────┘   └──────┬───────┘   └──────────┬────────────┘ │
//! │                            │                      │              │
//! │                     ┌──────▼───────┐      ┌───────▼──────┐       │
//! │                     │ ToolRegistry │      │  Normalizer  │       │
//! │                     │ local+remote │      │ result|stream│       │
//! │                     └──────────────┘      └──────────────┘       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concrete model providers, the identity broker and the remote tool
//! client are strategy implementations living in `agent-runtime`.

pub mod agent;
pub mod cache;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod message;
pub mod normalizer;
pub mod provider;
pub mod registry;
pub mod tool;

pub use agent::{Agent, AgentConfig, AgentFactory, ModelAgentFactory};
pub use cache::{AgentCache, SessionKey, SessionScope};
pub use credential::{Credential, CredentialOrigin, CredentialResolver, CredentialSource, CredentialState};
pub use error::{AgentError, Result};
pub use gateway::{Gateway, InvocationContext, InvocationRequest};
pub use message::{Conversation, Message, Role};
pub use normalizer::{CompleteResponse, InvocationResponse, ResponseMode};
pub use provider::{LlmProvider, ModelFactory, ProviderKind};
pub use registry::{ConflictPolicy, RemoteToolSource, ToolRegistry};
pub use tool::{Tool, ToolCall, ToolOrigin, ToolResult, ToolSchema, ToolSet};
