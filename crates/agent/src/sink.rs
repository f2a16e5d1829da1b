//! The presentation boundary.
//!
//! The orchestrator only writes to a [`PresentationSink`]; it never reads
//! anything back. Front-ends implement it directly (the terminal), or use
//! [`ChannelSink`] to forward [`SinkEvent`]s to another task, e.g. an SSE or
//! WebSocket writer.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use toolbox_core::usage::TokenUsage;

/// Write-only callbacks for incremental output.
pub trait PresentationSink: Send {
    /// Newly visible answer text.
    fn on_text_delta(&mut self, text: &str);

    /// The model started a tool request.
    fn on_tool_start(&mut self, name: &str);

    /// A tool finished. `result` is the raw envelope string.
    fn on_tool_result(&mut self, name: &str, input: &str, result: &str);

    /// The turn ended with this final answer.
    fn on_turn_final(&mut self, text: &str);

    /// Token counts reported by one model call.
    fn on_usage(&mut self, usage: &TokenUsage);

    /// The turn was aborted.
    fn on_error(&mut self, _message: &str) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PresentationSink for NullSink {
    fn on_text_delta(&mut self, _text: &str) {}
    fn on_tool_start(&mut self, _name: &str) {}
    fn on_tool_result(&mut self, _name: &str, _input: &str, _result: &str) {}
    fn on_turn_final(&mut self, _text: &str) {}
    fn on_usage(&mut self, _usage: &TokenUsage) {}
}

/// Sink callbacks as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkEvent {
    /// Partial answer text.
    Chunk { content: String },

    ToolStart { name: String },

    ToolResult {
        name: String,
        input: String,
        result: String,
    },

    Final { content: String },

    Usage { usage: TokenUsage },

    Error { message: String },
}

impl SinkEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolResult { .. } => "tool_result",
            Self::Final { .. } => "final",
            Self::Usage { .. } => "usage",
            Self::Error { .. } => "error",
        }
    }
}

/// Keeps every event in order.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub events: Vec<SinkEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenation of all streamed chunks.
    pub fn streamed_text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Chunk { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl PresentationSink for RecordingSink {
    fn on_text_delta(&mut self, text: &str) {
        self.events.push(SinkEvent::Chunk { content: text.into() });
    }

    fn on_tool_start(&mut self, name: &str) {
        self.events.push(SinkEvent::ToolStart { name: name.into() });
    }

    fn on_tool_result(&mut self, name: &str, input: &str, result: &str) {
        self.events.push(SinkEvent::ToolResult {
            name: name.into(),
            input: input.into(),
            result: result.into(),
        });
    }

    fn on_turn_final(&mut self, text: &str) {
        self.events.push(SinkEvent::Final { content: text.into() });
    }

    fn on_usage(&mut self, usage: &TokenUsage) {
        self.events.push(SinkEvent::Usage { usage: *usage });
    }

    fn on_error(&mut self, message: &str) {
        self.events.push(SinkEvent::Error {
            message: message.into(),
        });
    }
}

/// Forwards events to a channel. A closed receiver is ignored; the turn
/// still completes and History stays consistent.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<SinkEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: SinkEvent) {
        let _ = self.tx.send(event);
    }
}

impl PresentationSink for ChannelSink {
    fn on_text_delta(&mut self, text: &str) {
        self.send(SinkEvent::Chunk { content: text.into() });
    }

    fn on_tool_start(&mut self, name: &str) {
        self.send(SinkEvent::ToolStart { name: name.into() });
    }

    fn on_tool_result(&mut self, name: &str, input: &str, result: &str) {
        self.send(SinkEvent::ToolResult {
            name: name.into(),
            input: input.into(),
            result: result.into(),
        });
    }

    fn on_turn_final(&mut self, text: &str) {
        self.send(SinkEvent::Final { content: text.into() });
    }

    fn on_usage(&mut self, usage: &TokenUsage) {
        self.send(SinkEvent::Usage { usage: *usage });
    }

    fn on_error(&mut self, message: &str) {
        self.send(SinkEvent::Error {
            message: message.into(),
        });
    }
}
