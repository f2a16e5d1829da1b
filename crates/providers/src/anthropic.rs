//! Anthropic native Messages API provider.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE, translated event by event with [`translate`]

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use toolbox_core::message::{ContentBlock as Block, DocumentBlock, Message, Role};
use toolbox_core::provider::{ConverseRequest, EventStream, ModelProvider, StopReason, StreamEvent};
use toolbox_core::{ProviderError, TokenUsage};
use tracing::{debug, trace};

use crate::check_status;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert messages to Anthropic API format with content blocks.
    fn to_api_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|msg| AnthropicMessage {
                role: match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: msg.content.iter().map(Self::to_api_block).collect(),
            })
            .collect()
    }

    fn to_api_block(block: &Block) -> ContentBlock {
        match block {
            Block::Text(text) => ContentBlock::Text { text: text.clone() },
            Block::Image(image) => ContentBlock::Image {
                source: json!({
                    "type": "base64",
                    "media_type": format!("image/{}", image.format),
                    "data": base64_encode(&image.source.bytes),
                }),
            },
            Block::Document(doc) => Self::document_block(doc),
            Block::ToolUse(tool) => ContentBlock::ToolUse {
                id: tool.tool_use_id.clone(),
                name: tool.name.clone(),
                input: tool.input.clone(),
            },
            Block::ToolResult(result) => ContentBlock::ToolResult {
                tool_use_id: result.tool_use_id.clone(),
                content: result
                    .content
                    .iter()
                    .map(|c| c.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            },
        }
    }

    /// PDFs go as base64 documents, text formats as plain-text documents.
    /// Office formats have no native block here, so the model gets a note.
    fn document_block(doc: &DocumentBlock) -> ContentBlock {
        match doc.format.as_str() {
            "pdf" => ContentBlock::Document {
                title: doc.name.clone(),
                source: json!({
                    "type": "base64",
                    "media_type": "application/pdf",
                    "data": base64_encode(&doc.source.bytes),
                }),
            },
            "txt" | "md" | "csv" | "html" => ContentBlock::Document {
                title: doc.name.clone(),
                source: json!({
                    "type": "text",
                    "media_type": "text/plain",
                    "data": String::from_utf8_lossy(&doc.source.bytes),
                }),
            },
            other => ContentBlock::Text {
                text: format!("[Attached {other} document '{}' cannot be read by this provider]", doc.name),
            },
        }
    }

    fn request_body(request: &ConverseRequest) -> Value {
        let mut body = json!({
            "model": request.model_id,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.inference_config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.inference_config.temperature,
            "stream": true,
        });

        let system: Vec<&str> = request.system.iter().map(|s| s.text.as_str()).collect();
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if let Some(top_p) = request.inference_config.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(fields) = request.additional_model_request_fields.as_object() {
            for (key, value) in fields {
                body[key.as_str()] = value.clone();
            }
        }
        if let Some(config) = &request.tool_config {
            let tools: Vec<Value> = config
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
            // One tool request per turn.
            body["tool_choice"] = json!({"type": "auto", "disable_parallel_tool_use": true});
        }
        body
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, request: ConverseRequest) -> Result<EventStream, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(&request);

        debug!(provider = "anthropic", model = %request.model_id, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = check_status("anthropic", response).await?;

        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            // Raw bytes: a multi-byte character may straddle two chunks.
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };

                buffer.extend_from_slice(&bytes);

                while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim_end_matches(['\r', '\n']);

                    // Event names are repeated in the JSON `type` field.
                    if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }

                    let event: Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };
                    let is_stop = event["type"] == "message_stop";

                    match translate(&event) {
                        Ok(events) => {
                            for ev in events {
                                if tx.send(Ok(ev)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                    if is_stop {
                        return;
                    }
                }
            }
        });

        Ok(EventStream::new(rx))
    }
}

/// Translate one Anthropic SSE payload into normalized events.
pub fn translate(event: &Value) -> Result<Vec<StreamEvent>, ProviderError> {
    let event_type = event["type"].as_str().unwrap_or_default();
    let events = match event_type {
        "message_start" => {
            let input = event.pointer("/message/usage/input_tokens").and_then(Value::as_u64);
            input
                .map(|n| vec![StreamEvent::Usage(TokenUsage::new(n, 0))])
                .unwrap_or_default()
        }
        "content_block_start" => {
            let block = &event["content_block"];
            match block["type"].as_str() {
                Some("tool_use") => vec![StreamEvent::ToolUseStart {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                }],
                Some("text") => match block["text"].as_str() {
                    Some(text) if !text.is_empty() => vec![StreamEvent::TextDelta(text.to_string())],
                    _ => Vec::new(),
                },
                other => vec![StreamEvent::Unknown(format!(
                    "content_block_start.{}",
                    other.unwrap_or("?")
                ))],
            }
        }
        "content_block_delta" => {
            let delta = &event["delta"];
            match delta["type"].as_str() {
                Some("text_delta") => vec![StreamEvent::TextDelta(
                    delta["text"].as_str().unwrap_or_default().to_string(),
                )],
                Some("input_json_delta") => vec![StreamEvent::ToolUseDelta(
                    delta["partial_json"].as_str().unwrap_or_default().to_string(),
                )],
                other => vec![StreamEvent::Unknown(format!("content_block_delta.{}", other.unwrap_or("?")))],
            }
        }
        "message_delta" => {
            let mut events = Vec::new();
            if let Some(out) = event.pointer("/usage/output_tokens").and_then(Value::as_u64) {
                events.push(StreamEvent::Usage(TokenUsage::new(0, out)));
            }
            if let Some(reason) = event.pointer("/delta/stop_reason").and_then(Value::as_str) {
                events.push(StreamEvent::TurnEnd(StopReason::parse(reason)));
            }
            events
        }
        "content_block_stop" | "message_stop" | "ping" => Vec::new(),
        "error" => {
            let message = event
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("stream error")
                .to_string();
            return Err(match event.pointer("/error/type").and_then(Value::as_str) {
                Some("overloaded_error") | Some("rate_limit_error") => ProviderError::RateLimited(message),
                Some("authentication_error") | Some("permission_error") => {
                    ProviderError::AuthenticationFailed(message)
                }
                _ => ProviderError::StreamInterrupted(message),
            });
        }
        other => vec![StreamEvent::Unknown(other.to_string())],
    };
    Ok(events)
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: Value },
    #[serde(rename = "document")]
    Document { title: String, source: Value },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },
    #[serde(rename = "tool_result")]
    ToolResult { tool_use_id: String, content: String },
}
