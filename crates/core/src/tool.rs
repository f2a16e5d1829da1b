//! Tool descriptors, the per-call tool configuration and the executor seam.
//!
//! Tools are leaf functions with a fixed input/output contract. Every result
//! crossing back into the conversation is wrapped in a uniform envelope,
//! `{"result": ...}` or `{"error": "..."}`, and callers only ever branch on
//! the presence of the `"error"` key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};

use crate::error::ToolError;
use crate::usage::TokenUsage;

/// Static description of one tool, sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema: `{"type": "object", "properties": {..}, "required": [..]}`
    pub input_schema: Value,
}

/// The persona's tool subset, materialized for one model call. The model
/// always picks tools itself (`auto`).
#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    pub tools: Vec<ToolDescriptor>,
}

impl ToolConfig {
    pub fn auto(tools: Vec<ToolDescriptor>) -> Self {
        Self { tools }
    }

    /// Converse wire shape: each descriptor nested under `toolSpec` with its
    /// schema under `inputSchema.json`.
    pub fn to_converse_json(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|t| {
                json!({
                    "toolSpec": {
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": { "json": t.input_schema }
                    }
                })
            })
            .collect();
        json!({ "tools": tools, "toolChoice": {"auto": {}} })
    }
}

impl Serialize for ToolConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_converse_json().serialize(serializer)
    }
}

/// Input handed to a tool when the model's input fragments were not valid JSON.
pub fn invalid_json_input() -> Value {
    json!({ "error": "Invalid JSON input" })
}

/// If `input` is an `{"error": ..}` placeholder, return its message.
pub fn input_error(input: &Value) -> Option<&str> {
    let obj = input.as_object()?;
    if obj.len() == 1 {
        obj.get("error").and_then(Value::as_str)
    } else {
        None
    }
}

/// Wrap an execution outcome in the result envelope.
pub fn envelope(outcome: &Result<Value, ToolError>) -> Value {
    match outcome {
        Ok(value) => json!({ "result": value }),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

/// The error message carried by an envelope, if it is an error envelope.
pub fn envelope_error(envelope: &Value) -> Option<&str> {
    envelope.get("error").map(|e| e.as_str().unwrap_or("unknown error"))
}

/// Check `input` against a JSON Schema object: it must be an object, carry
/// every required property, and declared primitive types must match.
pub fn validate_input(schema: &Value, input: &Value) -> Result<(), String> {
    let Some(obj) = input.as_object() else {
        return Err("input must be a JSON object".into());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(key) {
                return Err(format!("missing required property '{key}'"));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in obj {
            let Some(expected) = props.get(key).and_then(|p| p.get("type")).and_then(Value::as_str)
            else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "object" => value.is_object(),
                "array" => value.is_array(),
                _ => true,
            };
            if !ok {
                return Err(format!("property '{key}' must be of type {expected}"));
            }
        }
    }

    Ok(())
}

/// The executor seam between the orchestrator and the tool registry.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Descriptors of the tools this executor will accept.
    fn descriptors(&self) -> Vec<ToolDescriptor>;

    /// The configuration sent with each model call; `None` when no tools are enabled.
    fn tool_config(&self) -> Option<ToolConfig> {
        let tools = self.descriptors();
        if tools.is_empty() {
            None
        } else {
            Some(ToolConfig::auto(tools))
        }
    }

    /// Run a tool by exact name.
    async fn execute(&self, name: &str, input: Value) -> Result<Value, ToolError>;

    /// Tokens spent by tools on their own model calls since the last call,
    /// which resets the count.
    async fn take_usage(&self) -> TokenUsage {
        TokenUsage::default()
    }

    /// Run a tool and return the serialized envelope. Never fails.
    async fn process(&self, name: &str, input: Value) -> String {
        let outcome = self.execute(name, input).await;
        if let Err(e) = &outcome {
            tracing::warn!(tool = %name, error = %e, "Tool call failed");
        }
        envelope(&outcome).to_string()
    }
}
