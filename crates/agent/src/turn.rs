//! The per-call state machine.
//!
//! One [`CallMachine`] consumes the events of exactly one model call and
//! decides what that call produced: a final answer, or one tool request.
//! It performs no I/O besides writing to the presentation sink.

use serde_json::Value;
use toolbox_core::error::ProviderError;
use toolbox_core::message::ToolUseBlock;
use toolbox_core::provider::{StopReason, StreamEvent};
use toolbox_core::tool::invalid_json_input;
use toolbox_core::usage::TokenUsage;
use tracing::{debug, trace, warn};

use crate::answer_filter::AnswerFilter;
use crate::sink::PresentationSink;

#[derive(Debug, Clone, PartialEq)]
enum CallState {
    AwaitTextOrTool,
    AccumulatingToolInput { id: String, name: String, input: String },
}

/// What one model call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The model handed the turn back to the human.
    Final { text: String, stop_reason: StopReason },
    /// The model asked for a tool.
    ToolUse {
        text: String,
        tool_use: ToolUseBlock,
        /// Input fragments exactly as streamed.
        raw_input: String,
    },
}

#[derive(Debug)]
pub struct CallMachine {
    state: CallState,
    filter: AnswerFilter,
    stop_reason: Option<StopReason>,
    usage: TokenUsage,
}

impl Default for CallMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CallMachine {
    pub fn new() -> Self {
        Self {
            state: CallState::AwaitTextOrTool,
            filter: AnswerFilter::new(),
            stop_reason: None,
            usage: TokenUsage::default(),
        }
    }

    /// Usage reported by this call so far.
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn on_event(&mut self, event: StreamEvent, sink: &mut dyn PresentationSink) -> Result<(), ProviderError> {
        match event {
            StreamEvent::TextDelta(text) => {
                if self.stop_reason.is_some() {
                    debug!("Ignoring text received after turn end");
                    return Ok(());
                }
                let visible = self.filter.push(&text);
                if !visible.is_empty() {
                    sink.on_text_delta(&visible);
                }
            }
            StreamEvent::ToolUseStart { id, name } => {
                if let CallState::AccumulatingToolInput { name: current, .. } = &self.state {
                    return Err(ProviderError::Protocol(format!(
                        "second tool use '{name}' started while '{current}' was still open"
                    )));
                }
                debug!(tool = %name, tool_use_id = %id, "Tool use started");
                sink.on_tool_start(&name);
                self.state = CallState::AccumulatingToolInput {
                    id,
                    name,
                    input: String::new(),
                };
            }
            StreamEvent::ToolUseDelta(fragment) => match &mut self.state {
                CallState::AccumulatingToolInput { input, .. } => input.push_str(&fragment),
                CallState::AwaitTextOrTool => warn!("Tool input fragment without a tool use; ignoring"),
            },
            StreamEvent::TurnEnd(reason) => {
                if let Some(previous) = &self.stop_reason {
                    warn!(previous = %previous, stop_reason = %reason, "Duplicate turn end; keeping the first");
                    return Ok(());
                }
                if reason == StopReason::ToolUse && self.state == CallState::AwaitTextOrTool {
                    return Err(ProviderError::Protocol(
                        "turn ended with tool_use but no tool use was started".into(),
                    ));
                }
                debug!(stop_reason = %reason, "Turn end");
                self.stop_reason = Some(reason);
            }
            StreamEvent::Usage(usage) => {
                self.usage.add(&usage);
                sink.on_usage(&usage);
            }
            StreamEvent::Unknown(tag) => trace!(event = %tag, "Skipping unrecognised stream event"),
        }
        Ok(())
    }

    /// The stream has closed; settle what this call produced.
    pub fn finish(mut self, sink: &mut dyn PresentationSink) -> Result<CallOutcome, ProviderError> {
        let Some(stop_reason) = self.stop_reason.take() else {
            return Err(ProviderError::StreamInterrupted(
                "stream closed before the turn ended".into(),
            ));
        };

        let tail = self.filter.finish();
        if !tail.is_empty() {
            sink.on_text_delta(&tail);
        }
        let visible = self.filter.visible_text().to_string();

        match (stop_reason, self.state) {
            (StopReason::ToolUse, CallState::AccumulatingToolInput { id, name, input }) => {
                let parsed = parse_tool_input(&name, &input);
                Ok(CallOutcome::ToolUse {
                    text: visible,
                    tool_use: ToolUseBlock {
                        tool_use_id: id,
                        name,
                        input: parsed,
                    },
                    raw_input: input,
                })
            }
            (stop_reason, state) => {
                if let CallState::AccumulatingToolInput { name, .. } = state {
                    warn!(tool = %name, stop_reason = %stop_reason, "Turn ended mid tool input; dropping the request");
                }
                if visible.is_empty() && !self.filter.thinking_text().is_empty() {
                    debug!(
                        thinking_chars = self.filter.thinking_text().len(),
                        stop_reason = %stop_reason,
                        "Answer held only private reasoning"
                    );
                }
                Ok(CallOutcome::Final {
                    text: visible,
                    stop_reason,
                })
            }
        }
    }
}

/// Empty input means "no arguments"; malformed input becomes the
/// `{"error": "Invalid JSON input"}` placeholder.
fn parse_tool_input(tool: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(tool = %tool, error = %e, input = %raw, "Tool input is not valid JSON");
            invalid_json_input()
        }
    }
}
