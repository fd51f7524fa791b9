//! Session Agent Cache
//!
//! Maps a [`SessionKey`] to a constructed agent. Each key owns a slot that is
//! initialized at most once: concurrent first requests for the same key wait
//! on the single in-flight build and all observe the same handle.
//!
//! A build that fails or is cancelled publishes nothing; the next request for
//! that key builds again. Entries are never evicted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::Result;

pub const DEFAULT_SESSION_ID: &str = "default-session";
pub const DEFAULT_USER_ID: &str = "default-user";
const SHARED_SENTINEL: &str = "__shared__";

/// Cache identity: (session, user)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub session_id: String,
    pub user_id: String,
}

impl SessionKey {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Build a key, substituting sentinels for absent or blank identifiers
    pub fn from_parts(session_id: Option<&str>, user_id: Option<&str>) -> Self {
        let pick = |value: Option<&str>, default: &str| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        Self {
            session_id: pick(session_id, DEFAULT_SESSION_ID),
            user_id: pick(user_id, DEFAULT_USER_ID),
        }
    }

    /// The single key used when agents are not session-bound
    pub fn shared() -> Self {
        Self::new(SHARED_SENTINEL, SHARED_SENTINEL)
    }

    pub fn is_shared(&self) -> bool {
        self.session_id == SHARED_SENTINEL && self.user_id == SHARED_SENTINEL
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.session_id, self.user_id)
    }
}

/// Whether cached agents are bound to sessions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionScope {
    /// One agent per (session, user)
    PerSession,
    /// One agent for the whole process
    #[default]
    Shared,
}

impl SessionScope {
    /// The cache key a request for `key` resolves to under this scope
    pub fn key_for(self, key: &SessionKey) -> SessionKey {
        match self {
            Self::PerSession => key.clone(),
            Self::Shared => SessionKey::shared(),
        }
    }
}

type Slot<A> = Arc<OnceCell<Arc<A>>>;

/// Single-flight cache of agent handles
pub struct AgentCache<A> {
    slots: RwLock<HashMap<SessionKey, Slot<A>>>,
}

impl<A> Default for AgentCache<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> AgentCache<A> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Return the agent for `key`, building it with `build` on first use.
    ///
    /// `build` runs at most once per successful construction. Errors are
    /// returned to the caller and leave the key unpopulated.
    pub async fn get_or_create<F, Fut>(&self, key: &SessionKey, build: F) -> Result<Arc<A>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<A>>,
    {
        let slot = self.slot(key);
        if let Some(agent) = slot.get() {
            return Ok(Arc::clone(agent));
        }

        let agent = slot
            .get_or_try_init(|| async {
                tracing::debug!(key = %key, "Constructing agent");
                build().await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(agent))
    }

    /// The constructed agent for `key`, if any
    pub fn get(&self, key: &SessionKey) -> Option<Arc<A>> {
        self.slots.read().get(key).and_then(|slot| slot.get().cloned())
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.get(key).is_some()
    }

    /// Number of constructed agents
    pub fn len(&self) -> usize {
        self.slots.read().values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &SessionKey) -> Slot<A> {
        if let Some(slot) = self.slots.read().get(key) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().entry(key.clone()).or_default())
    }
}
