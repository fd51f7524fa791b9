//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Model credential could not be obtained (local variable unset, or the
    /// identity broker exchange failed). Sticky until process restart.
    #[error("Credential missing: {0}")]
    CredentialMissing(String),

    /// Remote tool server unreachable or returned malformed descriptors
    #[error("Tool discovery failed: {0}")]
    ToolDiscovery(String),

    /// Agent could not be constructed for a session key
    #[error("Agent construction failed: {0}")]
    AgentConstruction(String),

    /// The orchestration call failed while running
    #[error("Invocation failed: {0}")]
    Invocation(String),

    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Tool not found in tool set
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool validation failed
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Maximum iterations reached in reasoning loop
    #[error("Maximum iterations ({0}) reached")]
    MaxIterations(usize),

    /// Parse error (e.g., malformed payload)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Fold a failure raised inside an orchestration run into `Invocation`.
    ///
    /// Errors that already belong to the outer taxonomy pass through.
    #[must_use]
    pub fn into_invocation(self) -> Self {
        match self {
            e @ (Self::CredentialMissing(_)
            | Self::AgentConstruction(_)
            | Self::Invocation(_)
            | Self::Parse(_)) => e,
            other => Self::Invocation(other.to_string()),
        }
    }

    /// Stable machine-readable code for the external error shape
    pub const fn code(&self) -> &'static str {
        match self {
            Self::CredentialMissing(_) => "CREDENTIAL_MISSING",
            Self::AgentConstruction(_) => "AGENT_CONSTRUCTION_FAILED",
            Self::Invocation(_)
            | Self::Provider(_)
            | Self::ProviderUnavailable(_)
            | Self::ToolNotFound(_)
            | Self::ToolValidation(_)
            | Self::ToolExecution(_)
            | Self::MaxIterations(_) => "INVOCATION_FAILED",
            Self::Parse(_) | Self::Json(_) => "BAD_REQUEST",
            _ => "INTERNAL",
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::CredentialMissing(msg) => format!("Model credentials are unavailable: {msg}"),
            Self::AgentConstruction(_) => "The agent could not be started. Please try again.".into(),
            Self::Invocation(_) => "The agent failed to answer. Please try again.".into(),
            Self::Provider(_) => "The AI service encountered an error. Please try again.".into(),
            Self::ProviderUnavailable(_) => "The AI service is currently unavailable. Please try again.".into(),
            Self::MaxIterations(_) => "The request took too long to process. Please try a simpler query.".into(),
            Self::Parse(msg) => format!("Invalid request: {msg}"),
            Self::Json(e) => format!("Invalid request: {e}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_failures_fold_into_invocation() {
        let err = AgentError::Provider("500".into()).into_invocation();
        assert!(matches!(err, AgentError::Invocation(ref m) if m.contains("500")));
        assert_eq!(err.code(), "INVOCATION_FAILED");

        let err = AgentError::CredentialMissing("KEY".into()).into_invocation();
        assert_eq!(err.code(), "CREDENTIAL_MISSING");
    }

    #[test]
    fn invocation_message_hides_upstream_detail() {
        let err = AgentError::Provider(r#"anthropic returned 401: {"error":"bad key"}"#.into()).into_invocation();
        let message = err.user_message();
        assert!(!message.contains("401"));
        assert!(!message.contains("bad key"));
        assert!(err.to_string().contains("401"));
    }
}
