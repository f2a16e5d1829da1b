//! Message, ContentBlock and History domain types.
//!
//! These are the value objects sent to the model on every call. Blocks
//! serialize in the Converse wire shape (`{"text": ..}`, `{"toolUse": ..}`,
//! `{"toolResult": ..}`) so the Bedrock adapter can send History unchanged.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human, and tool results addressed back to the model
    User,
    /// The model
    Assistant,
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlock {
    Text(String),
    Image(ImageBlock),
    Document(DocumentBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub format: String,
    pub source: BinarySource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentBlock {
    pub name: String,
    pub format: String,
    pub source: BinarySource,
}

/// Raw attachment bytes, base64 on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinarySource {
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

/// A tool request made by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseBlock {
    pub tool_use_id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// The answer to a [`ToolUseBlock`], carrying the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: Vec<ToolResultText>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultText {
    pub text: String,
}

/// A single conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Create a plain-text user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text(text.into())],
        }
    }

    /// Create a plain-text assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text(text.into())],
        }
    }

    /// Create an assistant message that ends in a tool request.
    ///
    /// Empty text is omitted; the tool request is always the last block.
    pub fn assistant_tool_use(text: &str, tool_use: ToolUseBlock) -> Self {
        let mut content = Vec::with_capacity(2);
        if !text.trim().is_empty() {
            content.push(ContentBlock::Text(text.to_string()));
        }
        content.push(ContentBlock::ToolUse(tool_use));
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Create the user-role message that carries a tool result back to the model.
    pub fn tool_result(tool_use_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::ToolResult(ToolResultBlock {
                tool_use_id: tool_use_id.into(),
                content: vec![ToolResultText { text: text.into() }],
            })],
        }
    }

    /// Concatenated text of all `Text` blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_use(&self) -> Option<&ToolUseBlock> {
        self.content.iter().find_map(|b| match b {
            ContentBlock::ToolUse(t) => Some(t),
            _ => None,
        })
    }

    pub fn tool_result_block(&self) -> Option<&ToolResultBlock> {
        self.content.iter().find_map(|b| match b {
            ContentBlock::ToolResult(t) => Some(t),
            _ => None,
        })
    }
}

const IMAGE_FORMATS: &[&str] = &["png", "jpeg", "gif", "webp"];
const DOCUMENT_FORMATS: &[&str] = &["pdf", "csv", "doc", "docx", "xls", "xlsx", "html", "txt", "md"];

/// A file the user attached to their prompt.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// What an attachment becomes once classified by extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentKind {
    Image { format: String },
    Document { name: String, format: String },
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Classify by extension. Unknown document types are sent as `txt`.
    pub fn kind(&self) -> AttachmentKind {
        let path = std::path::Path::new(&self.file_name);
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let ext = if ext == "jpg" { "jpeg".to_string() } else { ext };

        if IMAGE_FORMATS.contains(&ext.as_str()) {
            return AttachmentKind::Image { format: ext };
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        let format = if DOCUMENT_FORMATS.contains(&ext.as_str()) {
            ext
        } else {
            "txt".to_string()
        };
        AttachmentKind::Document {
            name: document_name(stem),
            format,
        }
    }

    pub fn to_block(&self) -> ContentBlock {
        let source = BinarySource {
            bytes: self.bytes.clone(),
        };
        match self.kind() {
            AttachmentKind::Image { format } => ContentBlock::Image(ImageBlock { format, source }),
            AttachmentKind::Document { name, format } => {
                ContentBlock::Document(DocumentBlock { name, format, source })
            }
        }
    }

    /// `data:` URL for inline display of image attachments.
    pub fn data_url(&self) -> Option<String> {
        match self.kind() {
            AttachmentKind::Image { format } => Some(format!(
                "data:image/{format};base64,{}",
                base64_bytes::encode(&self.bytes)
            )),
            AttachmentKind::Document { .. } => None,
        }
    }
}

/// Document names may only hold alphanumerics, single spaces, hyphens,
/// parentheses and square brackets.
fn document_name(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '(' | ')' | '[' | ']') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "document".into()
    } else {
        collapsed
    }
}

/// A human turn: prompt text plus an optional attachment.
#[derive(Debug, Clone)]
pub struct UserInput {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl UserInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn to_message(&self) -> Message {
        let mut content = vec![ContentBlock::Text(self.text.clone())];
        if let Some(attachment) = &self.attachment {
            content.push(attachment.to_block());
        }
        Message {
            role: Role::User,
            content,
        }
    }
}

/// The ordered conversation sent to the model on every call.
///
/// Append-only. A user message pushed onto a user tail is merged into the
/// tail so roles keep alternating (this happens after a turn was aborted
/// right after a tool result).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        if let Some(tail) = self.messages.last_mut() {
            if tail.role == message.role {
                debug!(role = ?message.role, "Coalescing consecutive message into history tail");
                tail.content.extend(message.content);
                return;
            }
        }
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
