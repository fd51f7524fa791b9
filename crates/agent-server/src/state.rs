//! Application State

use std::sync::Arc;

use agent_core::gateway::Gateway;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Entry point for every invocation; owns the credential and agent caches
    pub gateway: Arc<Gateway>,
}

impl AppState {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }
}
