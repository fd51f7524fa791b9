//! Identity Broker Credential Source
//!
//! Exchanges the workload's identity for the model provider's API key. The
//! broker is called at most once per process by the credential resolver; a
//! failed exchange is not retried.

use std::time::Duration;

use agent_core::{
    credential::{Credential, CredentialOrigin, CredentialSource},
    error::{AgentError, Result},
    provider::ProviderKind,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::BrokerConfig;

const API_KEY_PATH: &str = "identities/api-key";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyRequest<'a> {
    resource_credential_provider_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    workload_identity_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyResponse {
    api_key: String,
}

pub struct IdentityBrokerSource {
    client: Client,
    provider: ProviderKind,
    config: BrokerConfig,
}

impl IdentityBrokerSource {
    pub fn new(provider: ProviderKind, config: BrokerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AgentError::Config(format!("identity broker client: {e}")))?;
        Ok(Self { client, provider, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/{API_KEY_PATH}", self.config.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CredentialSource for IdentityBrokerSource {
    fn describe(&self) -> String {
        format!("identity-broker:{}", self.config.provider_name)
    }

    async fn fetch(&self) -> Result<Credential> {
        let token = self.config.workload_token.as_deref();
        let mut request = self.client.post(self.endpoint()).json(&ApiKeyRequest {
            resource_credential_provider_name: &self.config.provider_name,
            workload_identity_token: token,
        });
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let missing = |detail: String| {
            AgentError::CredentialMissing(format!(
                "identity broker could not supply '{}': {detail}",
                self.config.provider_name
            ))
        };

        let response = request.send().await.map_err(|e| missing(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(missing(format!("{status}: {body}")));
        }

        let body: ApiKeyResponse = response.json().await.map_err(|e| missing(e.to_string()))?;
        if body.api_key.trim().is_empty() {
            return Err(missing("empty key".into()));
        }

        Ok(Credential::with_key(self.provider, body.api_key, CredentialOrigin::IdentityBroker))
    }
}
