//! Tool Registry
//!
//! Assembles the [`ToolSet`] an agent is built with: the fixed local tools
//! merged with whatever a remote tool server advertises at construction time.
//!
//! ```text
//!   local {A, B}  ──┐
//!                   ├──▶ merge (by name) ──▶ ToolSet {A, B(local), C}
//!   remote {B, C} ──┘
//! ```
//!
//! Remote discovery failures never fail construction; the agent degrades to
//! the local tools.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AgentError, Result};
use crate::tool::{Tool, ToolSet};

/// A source of dynamically discovered tools
///
/// Implementations open a connection, list the server's tools and release the
/// connection before returning. The returned tools invoke the server on
/// their own, scoped, connection.
#[async_trait]
pub trait RemoteToolSource: Send + Sync {
    /// Endpoint description for logs
    fn endpoint(&self) -> &str;

    async fn discover(&self) -> Result<Vec<Arc<dyn Tool>>>;
}

/// Which definition survives a name collision between local and remote tools
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Keep the local definition and drop the remote duplicate
    #[default]
    PreferLocal,
    /// Let the remote definition replace the local one
    PreferRemote,
}

impl FromStr for ConflictPolicy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "prefer_local" => Ok(Self::PreferLocal),
            "remote" | "prefer_remote" => Ok(Self::PreferRemote),
            other => Err(AgentError::Config(format!("unknown conflict policy '{other}'"))),
        }
    }
}

/// Outcome of merging local and remote tools
pub struct Merged {
    pub tools: ToolSet,
    /// Names whose losing definition was dropped
    pub collisions: Vec<String>,
}

/// Merge two tool lists by name under the given policy
pub fn merge(local: &ToolSet, remote: Vec<Arc<dyn Tool>>, policy: ConflictPolicy) -> Merged {
    let mut collisions = Vec::new();

    let tools = match policy {
        ConflictPolicy::PreferLocal => {
            let mut tools = local.clone();
            for tool in remote {
                let name = tool.schema().name;
                if !tools.insert(tool) {
                    collisions.push(name);
                }
            }
            tools
        }
        ConflictPolicy::PreferRemote => {
            let mut tools = ToolSet::new();
            for tool in remote {
                let name = tool.schema().name;
                if local.contains(&name) {
                    collisions.push(name.clone());
                }
                if !tools.insert(tool) {
                    tracing::warn!(tool = %name, "Remote server advertised a duplicate tool");
                }
            }
            for tool in local.iter() {
                tools.insert(Arc::clone(tool));
            }
            tools
        }
    };

    Merged { tools, collisions }
}

/// Builds per-agent tool sets
pub struct ToolRegistry {
    local: ToolSet,
    remote: Option<Arc<dyn RemoteToolSource>>,
    policy: ConflictPolicy,
}

impl ToolRegistry {
    pub fn new(local: ToolSet) -> Self {
        Self {
            local,
            remote: None,
            policy: ConflictPolicy::default(),
        }
    }

    /// Build from a list of local tools; later duplicates are dropped
    pub fn from_local(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let mut local = ToolSet::new();
        for tool in tools {
            let name = tool.schema().name;
            if !local.insert(tool) {
                tracing::warn!(tool = %name, "Duplicate local tool ignored");
            }
        }
        Self::new(local)
    }

    #[must_use]
    pub fn with_remote(mut self, source: Arc<dyn RemoteToolSource>) -> Self {
        self.remote = Some(source);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub const fn local(&self) -> &ToolSet {
        &self.local
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Assemble the tool set for one agent construction.
    ///
    /// Never fails: a discovery error yields exactly the local tools.
    pub async fn build_tool_set(&self) -> ToolSet {
        let Some(remote) = &self.remote else {
            return self.local.clone();
        };

        let discovered = match remote.discover().await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!(
                    endpoint = remote.endpoint(),
                    error = %e,
                    "Remote tool discovery failed, continuing with local tools"
                );
                return self.local.clone();
            }
        };

        tracing::debug!(
            endpoint = remote.endpoint(),
            count = discovered.len(),
            "Discovered remote tools"
        );

        let merged = merge(&self.local, discovered, self.policy);
        for name in &merged.collisions {
            tracing::warn!(tool = %name, policy = ?self.policy, "Tool name collision between local and remote");
        }
        merged.tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolCall, ToolOrigin, ToolResult, ToolSchema};
    use serde_json::json;

    struct Named {
        name: &'static str,
        origin: ToolOrigin,
    }

    #[async_trait]
    impl Tool for Named {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: self.name.into(),
                description: String::new(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _call: &ToolCall) -> Result<ToolResult> {
            Ok(ToolResult::success(self.name, format!("{:?}", self.origin)))
        }

        fn origin(&self) -> ToolOrigin {
            self.origin
        }
    }

    fn local(name: &'static str) -> Arc<dyn Tool> {
        Arc::new(Named { name, origin: ToolOrigin::Local })
    }

    fn remote(name: &'static str) -> Arc<dyn Tool> {
        Arc::new(Named { name, origin: ToolOrigin::Remote })
    }

    struct StaticSource(Vec<&'static str>);

    #[async_trait]
    impl RemoteToolSource for StaticSource {
        fn endpoint(&self) -> &str {
            "static"
        }

        async fn discover(&self) -> Result<Vec<Arc<dyn Tool>>> {
            Ok(self.0.iter().map(|&n| remote(n)).collect())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl RemoteToolSource for Unreachable {
        fn endpoint(&self) -> &str {
            "http://127.0.0.1:1/mcp"
        }

        async fn discover(&self) -> Result<Vec<Arc<dyn Tool>>> {
            Err(AgentError::ToolDiscovery("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn local_definition_wins_on_collision() {
        let registry = ToolRegistry::from_local([local("A"), local("B")])
            .with_remote(Arc::new(StaticSource(vec!["B", "C"])));

        let tools = registry.build_tool_set().await;

        assert_eq!(tools.names(), vec!["A", "B", "C"]);
        assert_eq!(tools.get("B").unwrap().origin(), ToolOrigin::Local);
        assert_eq!(tools.get("C").unwrap().origin(), ToolOrigin::Remote);
    }

    #[tokio::test]
    async fn discovery_failure_degrades_to_local_set() {
        let registry = ToolRegistry::from_local([local("A"), local("B")])
            .with_remote(Arc::new(Unreachable));

        let tools = registry.build_tool_set().await;
        assert_eq!(tools.names(), vec!["A", "B"]);
    }

    #[test]
    fn merge_reports_collisions() {
        let registry = ToolRegistry::from_local([local("A"), local("B")]);
        let merged = merge(registry.local(), vec![remote("B"), remote("C")], ConflictPolicy::PreferLocal);
        assert_eq!(merged.collisions, vec!["B".to_string()]);
    }

    #[test]
    fn remote_preference_is_configurable() {
        let registry = ToolRegistry::from_local([local("A"), local("B")]);
        let merged = merge(registry.local(), vec![remote("B"), remote("C")], ConflictPolicy::PreferRemote);
        assert_eq!(merged.tools.len(), 3);
        assert_eq!(merged.tools.get("B").unwrap().origin(), ToolOrigin::Remote);
        assert_eq!(merged.collisions, vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn no_remote_returns_local_tools() {
        let registry = ToolRegistry::from_local([local("A"), local("A")]);
        assert!(!registry.has_remote());
        assert_eq!(registry.build_tool_set().await.names(), vec!["A"]);
    }
}
