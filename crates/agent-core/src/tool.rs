//! Tool System
//!
//! A tool is a named, schema-described capability with a single operation,
//! `execute`. Local tools are compiled in; remote tools are discovered from a
//! tool server. Both implement the same [`Tool`] trait and differ only in
//! [`ToolOrigin`].

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};

/// Tool call request from the LLM
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool identifier
    #[serde(alias = "tool")]
    pub name: String,

    #[serde(default)]
    pub arguments: HashMap<String, Value>,

    #[serde(default)]
    pub id: Option<String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: HashMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            id: None,
        }
    }

    /// Arguments as a JSON object
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone().into_iter().collect())
    }
}

/// Result from tool execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,

    pub id: Option<String>,

    pub success: bool,

    /// Output (success payload or error message)
    pub output: String,
}

impl ToolResult {
    pub fn success(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            success: false,
            output: error.into(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }
}

/// Tool definition schema (for LLM function calling)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier within a tool set
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// JSON Schema of the arguments object
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolSchema {
    /// Names listed in the schema's `required` array
    pub fn required(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Where a tool definition came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOrigin {
    /// Statically declared in this process
    Local,
    /// Discovered from a remote tool server
    Remote,
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with given arguments
    async fn execute(&self, call: &ToolCall) -> Result<ToolResult>;

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Local
    }

    /// Validate arguments before execution
    fn validate(&self, call: &ToolCall) -> Result<()> {
        let schema = self.schema();

        for param in schema.required() {
            if !call.arguments.contains_key(param) {
                return Err(AgentError::ToolValidation(format!(
                    "Missing required parameter: {param}"
                )));
            }
        }

        Ok(())
    }
}

/// The tools visible to one agent, unique by name, in insertion order
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tool unless its name is already taken.
    ///
    /// Returns `false` and leaves the set unchanged on a name collision.
    pub fn insert(&mut self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.schema().name;
        if self.index.contains_key(&name) {
            return false;
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Execute a tool call
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        tool.validate(call)?;
        tool.execute(call).await
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.schema().name).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// System prompt section describing the available tools
    pub fn prompt_section(&self) -> String {
        let mut prompt = String::from("## Available Tools\n\n");
        prompt.push_str("To use a tool, reply with ONLY a fenced block and nothing before it:\n\n");
        prompt.push_str("```tool\n{\"tool\": \"tool_name\", \"arguments\": {\"arg\": \"value\"}}\n```\n\n");

        for tool in &self.tools {
            let schema = tool.schema();
            let _ = writeln!(prompt, "### {}", schema.name);
            let _ = writeln!(prompt, "{}", schema.description);
            if let Some(props) = schema.input_schema.get("properties").and_then(Value::as_object) {
                let required = schema.required();
                prompt.push_str("**Parameters:**\n");
                for (name, spec) in props {
                    let ty = spec.get("type").and_then(Value::as_str).unwrap_or("any");
                    let marker = if required.contains(&name.as_str()) { " (required)" } else { "" };
                    let _ = writeln!(prompt, "- `{name}` ({ty}){marker}");
                }
            }
            prompt.push('\n');
        }

        prompt
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet").field("tools", &self.names()).finish()
    }
}
