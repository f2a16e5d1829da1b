//! Provider trait: the abstraction over streaming model backends.
//!
//! A provider takes the full conversation plus system prompt, inference
//! parameters and tool configuration, and returns an [`EventStream`] of
//! normalized [`StreamEvent`]s. Provider-specific wire events never leak
//! past this boundary.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::ToolConfig;
use crate::usage::TokenUsage;

/// A system prompt segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub text: String,
}

impl SystemPrompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Sampling parameters sent with every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: Some(4096),
            top_p: None,
        }
    }
}

/// Everything a provider needs to open one model call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseRequest {
    #[serde(skip)]
    pub model_id: String,
    pub messages: Vec<Message>,
    pub system: Vec<SystemPrompt>,
    pub inference_config: InferenceConfig,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub additional_model_request_fields: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
}

/// Why the model ended its turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl StopReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "end_turn" => Self::EndTurn,
            "tool_use" => Self::ToolUse,
            "max_tokens" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized streaming event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental assistant text
    TextDelta(String),
    /// The model started a tool request
    ToolUseStart { id: String, name: String },
    /// A fragment of the tool request's JSON input
    ToolUseDelta(String),
    /// The model finished its turn
    TurnEnd(StopReason),
    /// Token counts for this call
    Usage(TokenUsage),
    /// A provider event with no normalized counterpart, by tag
    Unknown(String),
}

pub type StreamItem = std::result::Result<StreamEvent, ProviderError>;

/// A lazy, finite, forward-only sequence of [`StreamEvent`]s for one model call.
///
/// Backed by a channel fed from a reader task. Dropping the stream closes
/// the channel, and the reader stops at its next send.
pub struct EventStream {
    inner: ReceiverStream<StreamItem>,
}

impl EventStream {
    pub fn new(rx: mpsc::Receiver<StreamItem>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
        }
    }

    /// A stream that yields exactly `items` and then closes.
    pub fn from_events(items: Vec<StreamItem>) -> Self {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            // Capacity covers every item, so this never fails.
            let _ = tx.try_send(item);
        }
        Self::new(rx)
    }

    /// Suspend until the next event, or `None` once the stream has closed.
    pub async fn next(&mut self) -> Option<StreamItem> {
        StreamExt::next(&mut self.inner).await
    }
}

impl Stream for EventStream {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

/// The core provider trait.
///
/// Implementations: Bedrock Converse stream, Anthropic Messages stream.
/// A provider never retries; every failure is returned to the caller.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// A human-readable name for this provider (e.g., "bedrock", "anthropic").
    fn name(&self) -> &str;

    /// Issue a fresh streaming call from the given request.
    async fn open(&self, request: ConverseRequest) -> std::result::Result<EventStream, ProviderError>;
}
