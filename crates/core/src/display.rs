//! The UI-facing projection of a conversation.
//!
//! Never sent to the model. Tool results are formatted generically from the
//! envelope; only the `"error"` key is ever inspected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{Attachment, AttachmentKind};
use crate::tool::envelope_error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayAttachment {
    Image { file_name: String, data_url: String },
    Document { file_name: String, name: String, format: String },
}

impl From<&Attachment> for DisplayAttachment {
    fn from(attachment: &Attachment) -> Self {
        match attachment.kind() {
            AttachmentKind::Image { format } => Self::Image {
                file_name: attachment.file_name.clone(),
                data_url: attachment.data_url().unwrap_or_else(|| format!("data:image/{format};base64,")),
            },
            AttachmentKind::Document { name, format } => Self::Document {
                file_name: attachment.file_name.clone(),
                name,
                format,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum DisplayEntry {
    User {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment: Option<DisplayAttachment>,
    },
    Assistant {
        text: String,
    },
    ToolCall {
        name: String,
        raw_input: String,
        formatted_result: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayLog {
    entries: Vec<DisplayEntry>,
}

impl DisplayLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: DisplayEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[DisplayEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Render a serialized tool envelope for humans.
pub fn format_tool_result(raw: &str) -> String {
    let Ok(envelope) = serde_json::from_str::<Value>(raw) else {
        return raw.to_string();
    };
    if let Some(message) = envelope_error(&envelope) {
        return format!("Error: {message}");
    }
    match envelope.get("result") {
        Some(result) => format_value(result),
        None => format_value(&envelope),
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => "(no results)".into(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {}", i + 1, inline(item)))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}: {}", inline(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn inline(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}: {}", inline(v)))
            .collect::<Vec<_>>()
            .join(" | "),
        other => other.to_string(),
    }
}
