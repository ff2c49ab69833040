use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::llm::ToolSpec;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
}

/// A named capability the model may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the argument object.
    fn parameters(&self) -> Value;
    async fn execute(&self, input: Value) -> Result<String, ToolError>;
}

/// Name-indexed capability table. Built once at start-up, read-only after.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Box<dyn Tool>>,
    order: Vec<&'static str>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        let name = tool.name();
        if self.tools.insert(name, Box::new(tool)).is_none() {
            self.order.push(name);
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.order.clone()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Runs one capability call. Every failure becomes a `❌` string so the
    /// model can explain it instead of the turn failing.
    pub async fn invoke(&self, name: &str, raw_arguments: &str) -> String {
        let Some(tool) = self.tools.get(name) else {
            warn!(event_name = "agent.tool.unknown", tool = name, "model requested unknown tool");
            return format!("❌ Unknown capability: {name}");
        };

        let input = match parse_arguments(raw_arguments) {
            Ok(input) => input,
            Err(error) => return format!("❌ {error}"),
        };

        match tool.execute(input).await {
            Ok(output) => {
                info!(event_name = "agent.tool.completed", tool = name, "tool call completed");
                output
            }
            Err(error) => {
                warn!(
                    event_name = "agent.tool.failed",
                    tool = name,
                    error = %error,
                    "tool call failed"
                );
                format!("❌ {error}")
            }
        }
    }
}

fn parse_arguments(raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) => Ok(Value::Object(Map::new())),
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(ToolError::InvalidArguments("expected a JSON object".to_string())),
        Err(error) => Err(ToolError::InvalidArguments(error.to_string())),
    }
}

/// Reads a required string argument. Numbers and booleans are stringified.
pub fn required_str(input: &Value, key: &str) -> Result<String, ToolError> {
    optional_str(input, key)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing required field `{key}`")))
}

pub fn optional_str(input: &Value, key: &str) -> Option<String> {
    match input.get(key)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{optional_str, required_str, Tool, ToolError, ToolRegistry};

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echo the text argument."
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
        }

        async fn execute(&self, input: Value) -> Result<String, ToolError> {
            required_str(&input, "text")
        }
    }

    #[tokio::test]
    async fn invoke_dispatches_by_name() {
        let mut registry = ToolRegistry::default();
        registry.register(Echo);

        assert_eq!(registry.invoke("echo", r#"{"text":"hi"}"#).await, "hi");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.specs()[0].name, "echo");
    }

    #[tokio::test]
    async fn failures_become_strings() {
        let mut registry = ToolRegistry::default();
        registry.register(Echo);

        assert_eq!(registry.invoke("nope", "{}").await, "❌ Unknown capability: nope");
        assert_eq!(
            registry.invoke("echo", "{}").await,
            "❌ invalid arguments: missing required field `text`"
        );
        assert!(registry.invoke("echo", "not json").await.starts_with("❌ invalid arguments"));
        assert!(registry.invoke("echo", "[1]").await.contains("expected a JSON object"));
    }

    #[test]
    fn scalar_arguments_are_stringified() {
        let input = json!({"budget": 5000, "flag": true, "missing": null});
        assert_eq!(optional_str(&input, "budget").as_deref(), Some("5000"));
        assert_eq!(optional_str(&input, "flag").as_deref(), Some("true"));
        assert_eq!(optional_str(&input, "missing"), None);
    }
}
