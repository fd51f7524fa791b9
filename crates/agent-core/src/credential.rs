//! Credential Resolution
//!
//! The [`CredentialResolver`] obtains the model credential at most once per
//! process. Concurrent first callers race on a guard; exactly one performs the
//! exchange and every caller observes its outcome. A failed exchange is
//! sticky: it is returned to every later caller until the process restarts.
//!
//! ```text
//! Unloaded ──lock──▶ Loading ──ok──▶ Loaded
//!                       │
//!                       └──err──▶ Failed
//! ```

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{AgentError, Result};
use crate::provider::ProviderKind;

/// Where a credential came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialOrigin {
    /// Read from a local environment variable
    Environment,
    /// Exchanged with the identity broker
    IdentityBroker,
    /// Nothing to fetch; the provider authenticates ambiently
    Ambient,
}

/// An authenticated model-provider credential
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    provider: ProviderKind,
    api_key: Option<String>,
    origin: CredentialOrigin,
}

impl Credential {
    pub fn with_key(provider: ProviderKind, api_key: impl Into<String>, origin: CredentialOrigin) -> Self {
        Self {
            provider,
            api_key: Some(api_key.into()),
            origin,
        }
    }

    pub const fn ambient(provider: ProviderKind) -> Self {
        Self {
            provider,
            api_key: None,
            origin: CredentialOrigin::Ambient,
        }
    }

    pub const fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// The API key, or a construction error if this credential has none
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key().ok_or_else(|| {
            AgentError::AgentConstruction(format!("{} requires an API key", self.provider))
        })
    }

    pub const fn origin(&self) -> CredentialOrigin {
        self.origin
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("origin", &self.origin)
            .finish()
    }
}

/// Performs the actual credential exchange
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Short description for logs (never the secret itself)
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<Credential>;
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Local-development source: the raw key sits in a named environment variable
pub struct EnvCredentialSource {
    provider: ProviderKind,
    var: String,
    lookup: Lookup,
}

impl EnvCredentialSource {
    pub fn new(provider: ProviderKind, var: impl Into<String>) -> Self {
        Self::with_lookup(provider, var, |name| std::env::var(name).ok())
    }

    /// Use a custom variable lookup instead of the process environment
    pub fn with_lookup(
        provider: ProviderKind,
        var: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            provider,
            var: var.into(),
            lookup: Box::new(lookup),
        }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

#[async_trait]
impl CredentialSource for EnvCredentialSource {
    fn describe(&self) -> String {
        format!("env:{}", self.var)
    }

    async fn fetch(&self) -> Result<Credential> {
        match (self.lookup)(&self.var) {
            Some(key) if !key.trim().is_empty() => Ok(Credential::with_key(
                self.provider,
                key.trim(),
                CredentialOrigin::Environment,
            )),
            _ => Err(AgentError::CredentialMissing(format!(
                "{var} not found. Add {var}=your-key to .env.local",
                var = self.var
            ))),
        }
    }
}

/// Source for providers that need no key
pub struct AmbientCredentialSource(pub ProviderKind);

#[async_trait]
impl CredentialSource for AmbientCredentialSource {
    fn describe(&self) -> String {
        format!("ambient:{}", self.0)
    }

    async fn fetch(&self) -> Result<Credential> {
        Ok(Credential::ambient(self.0))
    }
}

/// Observable resolver status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialState {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

type Outcome = std::result::Result<Arc<Credential>, String>;

/// Process-wide, lazily initialized credential holder
pub struct CredentialResolver {
    source: Box<dyn CredentialSource>,
    outcome: OnceLock<Outcome>,
    guard: Mutex<()>,
}

impl CredentialResolver {
    pub fn new(source: impl CredentialSource + 'static) -> Self {
        Self::from_boxed(Box::new(source))
    }

    pub fn from_boxed(source: Box<dyn CredentialSource>) -> Self {
        Self {
            source,
            outcome: OnceLock::new(),
            guard: Mutex::new(()),
        }
    }

    /// Resolve the credential, exchanging it on first use.
    ///
    /// If the exchanging caller is cancelled mid-exchange nothing is recorded
    /// and the next caller performs the exchange.
    pub async fn resolve(&self) -> Result<Arc<Credential>> {
        if let Some(outcome) = self.outcome.get() {
            return Self::unpack(outcome);
        }

        let _guard = self.guard.lock().await;
        if let Some(outcome) = self.outcome.get() {
            return Self::unpack(outcome);
        }

        tracing::info!(source = %self.source.describe(), "Resolving model credential");
        let outcome = match self.source.fetch().await {
            Ok(credential) => {
                tracing::info!(provider = %credential.provider(), origin = ?credential.origin(), "Model credential loaded");
                Ok(Arc::new(credential))
            }
            Err(e) => {
                tracing::error!(error = %e, "Model credential resolution failed; failing until restart");
                Err(match e {
                    AgentError::CredentialMissing(msg) => msg,
                    other => other.to_string(),
                })
            }
        };

        Self::unpack(self.outcome.get_or_init(move || outcome))
    }

    pub fn state(&self) -> CredentialState {
        match self.outcome.get() {
            Some(Ok(_)) => CredentialState::Loaded,
            Some(Err(_)) => CredentialState::Failed,
            None if self.guard.try_lock().is_err() => CredentialState::Loading,
            None => CredentialState::Unloaded,
        }
    }

    fn unpack(outcome: &Outcome) -> Result<Arc<Credential>> {
        outcome
            .as_ref()
            .map(Arc::clone)
            .map_err(|msg| AgentError::CredentialMissing(msg.clone()))
    }
}
