//! End-to-end tests for the Toolbox agent.
//!
//! These drive the real orchestrator and the real tool executor, with only
//! the model replaced by a scripted stream.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use toolbox_agent::{ChannelSink, NullSink, Orchestrator, RecordingSink, Session, SessionHandle, SinkEvent};
use toolbox_config::AppConfig;
use toolbox_core::display::{DisplayAttachment, DisplayEntry};
use toolbox_core::error::{ProviderError, ToolError};
use toolbox_core::memory::MemoryStore;
use toolbox_core::message::{Attachment, ContentBlock, Message, UserInput};
use toolbox_core::persona::{Persona, builtin_personas, find_persona};
use toolbox_core::provider::{ConverseRequest, EventStream, ModelProvider, StopReason, StreamEvent, StreamItem};
use toolbox_core::usage::TokenUsage;
use toolbox_memory::{HashingEmbedder, InMemoryStore};
use toolbox_tools::{ToolSettings, Toolbox};

// ── Mock Provider ────────────────────────────────────────────────────────

/// A provider that streams one scripted call after another.
struct ScriptedProvider {
    calls: Mutex<VecDeque<Vec<StreamItem>>>,
    requests: Mutex<Vec<ConverseRequest>>,
}

impl ScriptedProvider {
    fn new(calls: Vec<Vec<StreamItem>>) -> Self {
        Self {
            calls: Mutex::new(calls.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ConverseRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn open(&self, request: ConverseRequest) -> Result<EventStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .calls
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider exhausted");
        Ok(EventStream::from_events(script))
    }
}

fn text_call(text: &str) -> Vec<StreamItem> {
    vec![
        Ok(StreamEvent::TextDelta(text.into())),
        Ok(StreamEvent::TurnEnd(StopReason::EndTurn)),
        Ok(StreamEvent::Usage(TokenUsage::new(10, 5))),
    ]
}

fn tool_call(id: &str, name: &str, input: Value) -> Vec<StreamItem> {
    let raw = input.to_string();
    let (head, tail) = raw.split_at(raw.len() / 2);
    vec![
        Ok(StreamEvent::TextDelta(format!("<thinking>use {name}</thinking>"))),
        Ok(StreamEvent::ToolUseStart {
            id: id.into(),
            name: name.into(),
        }),
        Ok(StreamEvent::ToolUseDelta(head.into())),
        Ok(StreamEvent::ToolUseDelta(tail.into())),
        Ok(StreamEvent::TurnEnd(StopReason::ToolUse)),
        Ok(StreamEvent::Usage(TokenUsage::new(20, 10))),
    ]
}

fn persona(name: &str) -> Persona {
    find_persona(&builtin_personas(), name).cloned().unwrap()
}

fn setup(
    persona: &Persona,
    calls: Vec<Vec<StreamItem>>,
) -> (Arc<ScriptedProvider>, Arc<InMemoryStore>, Orchestrator) {
    let provider = Arc::new(ScriptedProvider::new(calls));
    let memory = Arc::new(InMemoryStore::new(HashingEmbedder::shared()));
    let toolbox = Toolbox::for_persona(persona, memory.clone(), ToolSettings::default()).unwrap();
    let orchestrator = Orchestrator::new(provider.clone(), Arc::new(toolbox), "mock-model");
    (provider, memory, orchestrator)
}

/// The raw envelope of the `index`-th tool result in History.
fn tool_result_text(session: &Session, index: usize) -> String {
    session
        .history()
        .messages()
        .iter()
        .filter_map(Message::tool_result_block)
        .nth(index)
        .map(|b| b.content[0].text.clone())
        .unwrap()
}

// ── E2E: Memory tools across turns ───────────────────────────────────────

#[tokio::test]
async fn e2e_saved_memory_is_recalled_in_a_later_turn() {
    let assistant = persona("Personal Assistant");
    let (_, memory, orchestrator) = setup(
        &assistant,
        vec![
            tool_call("tu_1", "save_memory", serde_json::json!({"text": "user likes hiking"})),
            text_call("Noted, you like hiking."),
            tool_call("tu_2", "recall_memories", serde_json::json!({"query": "hobbies"})),
            text_call("You like hiking."),
        ],
    );
    let mut session = Session::new(assistant);

    let first = orchestrator
        .run_turn(&mut session, UserInput::text("Remember that I like hiking"), &mut NullSink)
        .await
        .unwrap();
    assert_eq!(first.tools_used, vec!["save_memory"]);
    let saved: Value = serde_json::from_str(&tool_result_text(&session, 0)).unwrap();
    assert_eq!(saved["result"]["message"], "Memory saved: user likes hiking...");
    assert_eq!(memory.list().await.unwrap().len(), 1);

    let second = orchestrator
        .run_turn(&mut session, UserInput::text("What are my hobbies?"), &mut NullSink)
        .await
        .unwrap();
    assert_eq!(second.text, "You like hiking.");
    assert!(tool_result_text(&session, 1).contains("user likes hiking"));

    // Two turns of four messages each, roles alternating.
    let messages = session.history().messages();
    assert_eq!(messages.len(), 8);
    for pair in messages.windows(2) {
        assert_ne!(pair[0].role, pair[1].role);
    }
    assert_eq!(session.usage(), TokenUsage::new(60, 30));
}

#[tokio::test]
async fn e2e_profile_update_then_read() {
    let assistant = persona("Personal Assistant");
    let (_, memory, orchestrator) = setup(
        &assistant,
        vec![
            tool_call(
                "tu_1",
                "update_user_profile",
                serde_json::json!({"profile": "Name: Sam. Lives in Oslo."}),
            ),
            tool_call("tu_2", "get_user_profile", serde_json::json!({})),
            text_call("You're Sam from Oslo."),
        ],
    );
    let mut session = Session::new(assistant);

    let summary = orchestrator
        .run_turn(&mut session, UserInput::text("I'm Sam, from Oslo. Who am I?"), &mut NullSink)
        .await
        .unwrap();

    assert_eq!(summary.tools_used, vec!["update_user_profile", "get_user_profile"]);
    assert!(tool_result_text(&session, 1).contains("Lives in Oslo"));
    assert_eq!(memory.get_profile().await.unwrap().as_deref(), Some("Name: Sam. Lives in Oslo."));
}

// ── E2E: Tool failures become envelopes ──────────────────────────────────

#[tokio::test]
async fn e2e_tool_outside_persona_is_unknown() {
    let funny = persona("Funny AI");
    let (_, _, orchestrator) = setup(
        &funny,
        vec![
            tool_call("tu_1", "execute_shell_command", serde_json::json!({"command": "ls"})),
            text_call("I can't do that, but here's a joke."),
        ],
    );
    let mut session = Session::new(funny);

    let summary = orchestrator
        .run_turn(&mut session, UserInput::text("list my files"), &mut NullSink)
        .await
        .unwrap();

    assert_eq!(summary.model_calls, 2);
    let envelope: Value = serde_json::from_str(&tool_result_text(&session, 0)).unwrap();
    assert_eq!(envelope["error"], "Unknown tool: execute_shell_command");
}

#[tokio::test]
async fn e2e_missing_required_field_is_invalid_input() {
    let assistant = persona("Personal Assistant");
    let (_, _, orchestrator) = setup(
        &assistant,
        vec![
            tool_call("tu_1", "save_memory", serde_json::json!({"note": "oops"})),
            text_call("Let me try that again later."),
        ],
    );
    let mut session = Session::new(assistant);

    orchestrator
        .run_turn(&mut session, UserInput::text("remember this"), &mut NullSink)
        .await
        .unwrap();

    let envelope: Value = serde_json::from_str(&tool_result_text(&session, 0)).unwrap();
    assert!(
        envelope["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid input for save_memory")
    );
}

#[test]
fn e2e_persona_with_unknown_tool_is_rejected() {
    let broken = Persona::new("Broken", "misconfigured", "prompt", &["search", "teleport"]);
    let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new(HashingEmbedder::shared()));
    let err = Toolbox::for_persona(&broken, memory, ToolSettings::default()).err().unwrap();
    assert_eq!(err, ToolError::UnknownTool("teleport".into()));
}

// ── E2E: Requests and presentation ───────────────────────────────────────

#[tokio::test]
async fn e2e_request_carries_persona_tools_and_attachment() {
    let crypto = persona("Crypto Investor");
    let (provider, _, orchestrator) = setup(&crypto, vec![text_call("Nice chart.")]);
    let mut session = Session::new(crypto);

    let input = UserInput::text("What do you see?").with_attachment(Attachment::new("chart.jpg", vec![1, 2, 3]));
    orchestrator.run_turn(&mut session, input, &mut NullSink).await.unwrap();

    let request = &provider.requests()[0];
    let tool_names: Vec<&str> = request
        .tool_config
        .as_ref()
        .unwrap()
        .tools
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(tool_names, vec!["search", "webscrape", "rss_feed"]);
    assert!(request.system[0].text.contains("CryptoAdvisor"));

    match &request.messages[0].content[1] {
        ContentBlock::Image(image) => assert_eq!(image.format, "jpeg"),
        other => panic!("expected an image block, got {other:?}"),
    }
    match &session.display().entries()[0] {
        DisplayEntry::User {
            attachment: Some(DisplayAttachment::Image { data_url, .. }),
            ..
        } => assert!(data_url.starts_with("data:image/jpeg;base64,")),
        other => panic!("unexpected display entry {other:?}"),
    }
}

#[tokio::test]
async fn e2e_channel_sink_sees_events_in_order() {
    let assistant = persona("Personal Assistant");
    let (_, _, orchestrator) = setup(
        &assistant,
        vec![
            tool_call("tu_1", "save_memory", serde_json::json!({"text": "likes tea"})),
            text_call("Saved."),
        ],
    );
    let handle = SessionHandle::new(Session::new(assistant));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut sink = ChannelSink::new(tx);

    handle
        .submit(&orchestrator, UserInput::text("I like tea"), &mut sink)
        .await
        .unwrap();
    drop(sink);

    let mut types = Vec::new();
    while let Some(event) = rx.recv().await {
        types.push(event.event_type());
    }
    assert_eq!(
        types,
        vec!["tool_start", "usage", "tool_result", "chunk", "usage", "final"]
    );
}

#[tokio::test]
async fn e2e_thinking_never_reaches_the_sink() {
    let assistant = persona("Personal Assistant");
    let (_, _, orchestrator) = setup(
        &assistant,
        vec![vec![
            Ok(StreamEvent::TextDelta("<think".into())),
            Ok(StreamEvent::TextDelta("ing>private</thinking><answer>Hi ".into())),
            Ok(StreamEvent::TextDelta("there</answer>".into())),
            Ok(StreamEvent::TurnEnd(StopReason::EndTurn)),
        ]],
    );
    let mut session = Session::new(assistant);
    let mut sink = RecordingSink::new();

    let summary = orchestrator
        .run_turn(&mut session, UserInput::text("hello"), &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.text, "Hi there");
    assert_eq!(sink.streamed_text(), "Hi there");
    assert!(!sink.events.iter().any(|e| matches!(
        e,
        SinkEvent::Chunk { content } if content.contains("private")
    )));
}

// ── E2E: Configuration ───────────────────────────────────────────────────

#[test]
fn e2e_config_defaults_and_validation() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.agent.max_round_trips, 25);
    assert!(config.persona(&config.agent.default_persona).is_some());
    for persona in config.personas() {
        assert!(
            toolbox_tools::resolve_tools(&persona.tools).is_ok(),
            "persona {} names an unknown tool",
            persona.name
        );
    }
}
