//! # agent-runtime
//!
//! Concrete collaborators for `agent-core`: everything that touches the
//! network lives here.
//!
//! ## Providers
//!
//! - **Anthropic** (default): Messages API
//! - **OpenAI** / **Gemini**: chat completions dialect
//! - **Ollama**: local inference, no API key
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{RuntimeConfig, build_gateway};
//!
//! let config = RuntimeConfig::from_env()?;
//! let gateway = build_gateway(&config, local_tools)?;
//! ```

use std::sync::Arc;

use agent_core::{
    agent::ModelAgentFactory,
    credential::CredentialResolver,
    error::Result,
    gateway::Gateway,
    registry::ToolRegistry,
    tool::Tool,
};

pub mod anthropic;
pub mod config;
pub mod factory;
pub mod identity;
pub mod mcp;
pub mod openai;
mod sse;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use config::RuntimeConfig;
pub use factory::ProviderModelFactory;
pub use mcp::McpClient;

/// Wire the gateway's collaborators from configuration.
///
/// Nothing is fetched here; the credential and remote tools load on first use.
pub fn build_gateway(config: &RuntimeConfig, local_tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Result<Gateway> {
    let credentials = Arc::new(CredentialResolver::from_boxed(config.credential_source()?));

    let mut registry = ToolRegistry::from_local(local_tools).with_policy(config.conflict_policy);
    if let Some(mcp) = &config.mcp {
        registry = registry.with_remote(Arc::new(McpClient::new(mcp.clone())?));
    }

    let models = Arc::new(ProviderModelFactory::from_config(config));
    let factory = Arc::new(ModelAgentFactory::new(models, config.agent_config()));

    tracing::info!(
        provider = %config.provider,
        model = %config.model_id,
        local_dev = config.local_dev,
        memory = config.memory,
        mode = ?config.response_mode,
        remote_tools = registry.has_remote(),
        "Runtime configured"
    );

    Ok(Gateway::new(credentials, Arc::new(registry), factory)
        .with_scope(config.scope())
        .with_mode(config.response_mode))
}
