//! Shared test helpers for orchestrator tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};
use toolbox_core::error::{ProviderError, ToolError};
use toolbox_core::provider::{ConverseRequest, EventStream, ModelProvider, StopReason, StreamEvent, StreamItem};
use toolbox_core::tool::{ToolDescriptor, ToolExecutor};
use toolbox_core::usage::TokenUsage;

/// A provider that plays back one scripted event list per call.
///
/// Panics if more calls are made than scripts provided.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Result<Vec<StreamItem>, ProviderError>>>,
    requests: Mutex<Vec<ConverseRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<StreamItem>>) -> Self {
        Self::with_results(scripts.into_iter().map(Ok).collect())
    }

    /// Scripts where a call may fail to open at all.
    pub fn with_results(scripts: Vec<Result<Vec<StreamItem>, ProviderError>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ConverseRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, request: ConverseRequest) -> Result<EventStream, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider: no script for call #{call}"));
        script.map(EventStream::from_events)
    }
}

/// A plain text answer, with usage reported after the turn end.
pub fn text_call(text: &str) -> Vec<StreamItem> {
    vec![
        Ok(StreamEvent::TextDelta(text.into())),
        Ok(StreamEvent::TurnEnd(StopReason::EndTurn)),
        Ok(StreamEvent::Usage(TokenUsage::new(10, 5))),
    ]
}

/// A tool request whose input arrives in `fragments`.
pub fn tool_call(id: &str, name: &str, fragments: &[&str]) -> Vec<StreamItem> {
    let mut events = vec![Ok(StreamEvent::ToolUseStart {
        id: id.into(),
        name: name.into(),
    })];
    events.extend(fragments.iter().map(|f| Ok(StreamEvent::ToolUseDelta(f.to_string()))));
    events.push(Ok(StreamEvent::TurnEnd(StopReason::ToolUse)));
    events.push(Ok(StreamEvent::Usage(TokenUsage::new(20, 8))));
    events
}

/// Tokens a stubbed `consult_agent` call spends on its own model call.
pub const CONSULT_USAGE: TokenUsage = TokenUsage {
    input_tokens: 7,
    output_tokens: 4,
    total_tokens: 11,
};

/// Canned tools: `search` succeeds, `webscrape` always fails and
/// `consult_agent` answers while reporting [`CONSULT_USAGE`].
#[derive(Default)]
pub struct StubTools {
    pub calls: Mutex<Vec<(String, Value)>>,
    pending_usage: Mutex<TokenUsage>,
}

impl StubTools {
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for StubTools {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        ["search", "webscrape", "consult_agent"]
            .into_iter()
            .map(|name| ToolDescriptor {
                name: name.into(),
                description: format!("{name} stub"),
                input_schema: json!({"type": "object", "properties": {}, "required": []}),
            })
            .collect()
    }

    async fn execute(&self, name: &str, input: Value) -> Result<Value, ToolError> {
        self.calls.lock().unwrap().push((name.to_string(), input.clone()));
        if let Some(reason) = toolbox_core::tool::input_error(&input) {
            return Err(ToolError::invalid(name, reason));
        }
        match name {
            "search" => Ok(json!([
                {"title": "AI news today", "href": "https://news.test/ai", "body": "Top stories"}
            ])),
            "webscrape" => Err(ToolError::failed("webscrape", "connection refused")),
            "consult_agent" => {
                self.pending_usage.lock().unwrap().add(&CONSULT_USAGE);
                Ok(json!("Ask a specialist."))
            }
            other => Err(ToolError::UnknownTool(other.into())),
        }
    }

    async fn take_usage(&self) -> TokenUsage {
        std::mem::take(&mut *self.pending_usage.lock().unwrap())
    }
}
