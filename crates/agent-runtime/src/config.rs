//! Runtime Configuration
//!
//! Every deployment variant is a set of environment variables read once at
//! startup. `from_lookup` takes any variable source so tests never touch the
//! process environment.

use std::str::FromStr;
use std::time::Duration;

use agent_core::{
    agent::{AgentConfig, DEFAULT_SYSTEM_PROMPT},
    cache::SessionScope,
    credential::{AmbientCredentialSource, CredentialSource, EnvCredentialSource},
    error::{AgentError, Result},
    normalizer::ResponseMode,
    provider::{GenerationOptions, ProviderKind},
    registry::ConflictPolicy,
};

use crate::identity::IdentityBrokerSource;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MCP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Remote tool server settings
#[derive(Clone, Debug)]
pub struct McpConfig {
    pub url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

/// Ollama endpoint settings
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: 120,
        }
    }
}

/// Identity broker settings
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub url: String,
    pub provider_name: String,
    pub workload_token: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub local_dev: bool,
    pub provider: ProviderKind,
    pub model_id: String,

    /// Variable holding the raw key in local mode
    pub credential_env_var: String,

    /// Present when the credential comes from the identity broker
    pub broker: Option<BrokerConfig>,

    pub mcp: Option<McpConfig>,

    /// Which definition wins when a remote tool shares a local tool's name
    pub conflict_policy: ConflictPolicy,

    pub memory: bool,
    pub response_mode: ResponseMode,
    pub agent_name: String,
    pub system_prompt: String,
    pub max_iterations: usize,
    pub ollama: OllamaConfig,
    pub bind_addr: String,
}

impl RuntimeConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let local_dev = flag(get("LOCAL_DEV"));
        let provider = match get("MODEL_PROVIDER") {
            Some(name) => ProviderKind::from_str(&name).map_err(|_| invalid("MODEL_PROVIDER", &name))?,
            None => ProviderKind::Anthropic,
        };

        let credential_env_var = get("CREDENTIAL_ENV_VAR").unwrap_or_else(|| provider.default_key_var().into());

        let broker = if local_dev || !provider.requires_api_key() {
            None
        } else {
            let url = get("IDENTITY_BROKER_URL").ok_or_else(|| {
                AgentError::Config(format!(
                    "IDENTITY_BROKER_URL is required for {provider} outside local development"
                ))
            })?;
            Some(BrokerConfig {
                url,
                provider_name: get("IDENTITY_PROVIDER_NAME")
                    .unwrap_or_else(|| provider.default_identity_provider().into()),
                workload_token: get("WORKLOAD_ACCESS_TOKEN"),
            })
        };

        let mcp = match get("MCP_SERVER_URL") {
            Some(url) => Some(McpConfig {
                url,
                auth_token: get("MCP_AUTH_TOKEN"),
                timeout: Duration::from_secs(number("MCP_TIMEOUT_SECS", get("MCP_TIMEOUT_SECS"), DEFAULT_MCP_TIMEOUT_SECS)?),
            }),
            None => None,
        };

        let conflict_policy = match get("TOOL_CONFLICT_POLICY") {
            Some(policy) => ConflictPolicy::from_str(&policy).map_err(|_| invalid("TOOL_CONFLICT_POLICY", &policy))?,
            None => ConflictPolicy::default(),
        };

        let response_mode = match get("RESPONSE_MODE") {
            Some(mode) => ResponseMode::from_str(&mode).map_err(|_| invalid("RESPONSE_MODE", &mode))?,
            None => ResponseMode::default(),
        };

        let defaults = OllamaConfig::default();
        let ollama = OllamaConfig {
            host: get("OLLAMA_HOST").unwrap_or(defaults.host),
            port: number("OLLAMA_PORT", get("OLLAMA_PORT"), defaults.port)?,
            ..defaults
        };

        Ok(Self {
            local_dev,
            provider,
            model_id: get("MODEL_ID").unwrap_or_else(|| provider.default_model().into()),
            credential_env_var,
            broker,
            mcp,
            conflict_policy,
            memory: flag(get("AGENT_MEMORY")),
            response_mode,
            agent_name: get("AGENT_NAME").unwrap_or_else(|| "agent".into()),
            system_prompt: get("SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            max_iterations: number("MAX_ITERATIONS", get("MAX_ITERATIONS"), DEFAULT_MAX_ITERATIONS)?,
            ollama,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
        })
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            name: self.agent_name.clone(),
            system_prompt: self.system_prompt.clone(),
            max_iterations: self.max_iterations,
            generation: GenerationOptions::for_model(&self.model_id),
            memory: self.memory,
        }
    }

    /// Memory on binds agents to sessions; off shares one agent
    pub const fn scope(&self) -> SessionScope {
        if self.memory {
            SessionScope::PerSession
        } else {
            SessionScope::Shared
        }
    }

    /// Pick where the model credential comes from
    pub fn credential_source(&self) -> Result<Box<dyn CredentialSource>> {
        if !self.provider.requires_api_key() {
            return Ok(Box::new(AmbientCredentialSource(self.provider)));
        }
        if self.local_dev {
            return Ok(Box::new(EnvCredentialSource::new(self.provider, &self.credential_env_var)));
        }
        match &self.broker {
            Some(broker) => Ok(Box::new(IdentityBrokerSource::new(self.provider, broker.clone())?)),
            None => Err(AgentError::Config("no credential source configured".into())),
        }
    }
}

fn flag(value: Option<String>) -> bool {
    value.is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn number<T: FromStr>(name: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        Some(raw) => raw.parse().map_err(|_| invalid(name, &raw)),
        None => Ok(default),
    }
}

fn invalid(name: &str, value: &str) -> AgentError {
    AgentError::Config(format!("invalid value for {name}: '{value}'"))
}
