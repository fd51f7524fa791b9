//! Built-in local tools

use agent_core::{
    Result,
    error::AgentError,
    tool::{Tool, ToolCall, ToolResult, ToolSchema},
};
use async_trait::async_trait;
use serde_json::{Value, json};

/// Adds two integers
pub struct AddNumbersTool;

impl AddNumbersTool {
    fn operand(call: &ToolCall, name: &str) -> Result<i64> {
        match call.arguments.get(name) {
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| AgentError::ToolValidation(format!("'{name}' must be an integer"))),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| AgentError::ToolValidation(format!("'{name}' must be an integer"))),
            _ => Err(AgentError::ToolValidation(format!("missing '{name}'"))),
        }
    }
}

#[async_trait]
impl Tool for AddNumbersTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "add_numbers".into(),
            description: "Return the sum of two numbers".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "a": {"type": "integer", "description": "First number"},
                    "b": {"type": "integer", "description": "Second number"}
                },
                "required": ["a", "b"]
            }),
        }
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
        let a = Self::operand(call, "a")?;
        let b = Self::operand(call, "b")?;
        let sum = a
            .checked_add(b)
            .ok_or_else(|| AgentError::ToolExecution("sum overflows".into()))?;
        Ok(ToolResult::success("add_numbers", sum.to_string()).with_id(call.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn call(args: Value) -> ToolCall {
        let arguments: HashMap<String, Value> = serde_json::from_value(args).unwrap();
        ToolCall::new("add_numbers", arguments)
    }

    #[tokio::test]
    async fn adds() {
        let result = AddNumbersTool.execute(&call(json!({"a": 2, "b": "40"}))).await.unwrap();
        assert_eq!(result.output, "42");
    }

    #[tokio::test]
    async fn rejects_non_integers() {
        let err = AddNumbersTool.execute(&call(json!({"a": 1.5, "b": 1}))).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolValidation(_)));
    }
}
