//! The conversation loop.
//!
//! For one human turn the orchestrator:
//!
//! 1. appends the user message to History
//! 2. opens a model call with History, system prompt, inference settings and
//!    the persona's tool configuration
//! 3. drains the event stream through a [`CallMachine`]
//! 4. on a tool request, appends the assistant `ToolUse` message, runs the
//!    tool, appends the `ToolResult` message and goes back to step 2
//! 5. on any other stop reason, appends the final assistant message and
//!    hands the turn back to the human
//!
//! Everything is strictly sequential: one model call or one tool call at a
//! time, and each stream is drained to its end before anything else runs.

use std::sync::Arc;

use serde_json::Value;
use toolbox_config::AppConfig;
use toolbox_core::display::{DisplayAttachment, DisplayEntry, format_tool_result};
use toolbox_core::error::ProviderError;
use toolbox_core::message::{Message, UserInput};
use toolbox_core::provider::{ConverseRequest, InferenceConfig, ModelProvider, StopReason, SystemPrompt};
use toolbox_core::tool::ToolExecutor;
use toolbox_core::usage::TokenUsage;
use tracing::{debug, info, warn};

use crate::session::{Session, TurnError};
use crate::sink::PresentationSink;
use crate::turn::{CallMachine, CallOutcome};

/// Appended when a turn hits the round-trip cap.
pub const ROUND_TRIP_LIMIT_NOTICE: &str =
    "I've reached the maximum number of tool calls for this turn. Please provide further guidance.";

/// Stored when the model ended its turn without producing any text.
pub const EMPTY_REPLY: &str = "(no response)";

/// What one human turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSummary {
    /// The final assistant text.
    pub text: String,
    /// Usage of this turn only; the session keeps the running total.
    pub usage: TokenUsage,
    /// Model calls made.
    pub model_calls: usize,
    /// Names of the tools run, in order.
    pub tools_used: Vec<String>,
    /// `None` when the round-trip cap stopped the loop.
    pub stop_reason: Option<StopReason>,
}

pub struct Orchestrator {
    provider: Arc<dyn ModelProvider>,
    tools: Arc<dyn ToolExecutor>,
    model_id: String,
    inference: InferenceConfig,
    additional_fields: Value,
    max_round_trips: usize,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ModelProvider>, tools: Arc<dyn ToolExecutor>, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            tools,
            model_id: model_id.into(),
            inference: InferenceConfig::default(),
            additional_fields: Value::Null,
            max_round_trips: 25,
        }
    }

    /// Model, inference settings and round-trip cap from configuration.
    pub fn from_config(config: &AppConfig, provider: Arc<dyn ModelProvider>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self::new(provider, tools, config.provider.model_id.clone())
            .with_inference(config.inference.to_inference_config())
            .with_additional_fields(config.inference.additional_fields())
            .with_max_round_trips(config.agent.max_round_trips)
    }

    pub fn with_inference(mut self, inference: InferenceConfig) -> Self {
        self.inference = inference;
        self
    }

    pub fn with_additional_fields(mut self, fields: Value) -> Self {
        self.additional_fields = fields;
        self
    }

    pub fn with_max_round_trips(mut self, max: usize) -> Self {
        self.max_round_trips = max.max(1);
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Run one human turn to completion.
    ///
    /// On a provider failure the turn is aborted: History keeps every
    /// complete message appended so far and nothing partial.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        input: UserInput,
        sink: &mut dyn PresentationSink,
    ) -> Result<TurnSummary, TurnError> {
        session.history.push(input.to_message());
        session.display.push(DisplayEntry::User {
            text: input.text.clone(),
            attachment: input.attachment.as_ref().map(DisplayAttachment::from),
        });

        let mut summary = TurnSummary {
            text: String::new(),
            usage: TokenUsage::default(),
            model_calls: 0,
            tools_used: Vec::new(),
            stop_reason: None,
        };

        info!(
            persona = %session.persona().name,
            history = session.history.len(),
            "Starting turn"
        );

        loop {
            if summary.tools_used.len() >= self.max_round_trips {
                warn!(round_trips = summary.tools_used.len(), "Round-trip limit reached");
                self.finish_turn(session, &mut summary, ROUND_TRIP_LIMIT_NOTICE.to_string(), sink);
                return Ok(summary);
            }

            summary.model_calls += 1;
            debug!(model_call = summary.model_calls, "Opening model call");

            let (outcome, usage) = self.call_model(session, sink).await;
            summary.usage.add(&usage);
            session.usage.add(&usage);

            match outcome {
                Ok(CallOutcome::Final { text, stop_reason }) => {
                    debug!(stop_reason = %stop_reason, "Turn complete");
                    summary.stop_reason = Some(stop_reason);
                    self.finish_turn(session, &mut summary, text, sink);
                    return Ok(summary);
                }
                Ok(CallOutcome::ToolUse {
                    text,
                    tool_use,
                    raw_input,
                }) => {
                    let name = tool_use.name.clone();
                    let tool_use_id = tool_use.tool_use_id.clone();
                    let tool_input = tool_use.input.clone();

                    session.history.push(Message::assistant_tool_use(&text, tool_use));
                    if !text.is_empty() {
                        session.display.push(DisplayEntry::Assistant { text });
                    }

                    info!(tool = %name, round_trip = summary.tools_used.len() + 1, "Running tool");
                    let result = self.tools.process(&name, tool_input).await;

                    // Model calls made by the tool itself count toward the turn.
                    let tool_usage = self.tools.take_usage().await;
                    if !tool_usage.is_empty() {
                        summary.usage.add(&tool_usage);
                        session.usage.add(&tool_usage);
                        sink.on_usage(&tool_usage);
                    }

                    session.history.push(Message::tool_result(tool_use_id, result.clone()));
                    session.display.push(DisplayEntry::ToolCall {
                        name: name.clone(),
                        raw_input: raw_input.clone(),
                        formatted_result: format_tool_result(&result),
                    });
                    sink.on_tool_result(&name, &raw_input, &result);
                    summary.tools_used.push(name);
                }
                Err(e) => {
                    warn!(error = %e, model_call = summary.model_calls, "Model call failed; aborting turn");
                    let message = e.to_string();
                    session.display.push(DisplayEntry::Error {
                        message: message.clone(),
                    });
                    sink.on_error(&message);
                    return Err(TurnError::Provider(e));
                }
            }
        }
    }

    /// Open one model call and drain it. Usage is returned even when the
    /// call fails part-way.
    async fn call_model(
        &self,
        session: &Session,
        sink: &mut dyn PresentationSink,
    ) -> (Result<CallOutcome, ProviderError>, TokenUsage) {
        let request = ConverseRequest {
            model_id: self.model_id.clone(),
            messages: session.history.messages().to_vec(),
            system: vec![SystemPrompt::new(session.system_prompt())],
            inference_config: self.inference.clone(),
            additional_model_request_fields: self.additional_fields.clone(),
            tool_config: self.tools.tool_config(),
        };

        let mut stream = match self.provider.open(request).await {
            Ok(stream) => stream,
            Err(e) => return (Err(e), TokenUsage::default()),
        };

        let mut machine = CallMachine::new();
        // Drain to the end: some providers report usage after the turn end.
        while let Some(item) = stream.next().await {
            let step = item.and_then(|event| machine.on_event(event, sink));
            if let Err(e) = step {
                return (Err(e), machine.usage());
            }
        }

        let usage = machine.usage();
        (machine.finish(sink), usage)
    }

    fn finish_turn(&self, session: &mut Session, summary: &mut TurnSummary, text: String, sink: &mut dyn PresentationSink) {
        let text = if text.trim().is_empty() {
            EMPTY_REPLY.to_string()
        } else {
            text
        };
        session.history.push(Message::assistant(text.clone()));
        session.display.push(DisplayEntry::Assistant { text: text.clone() });
        sink.on_turn_final(&text);
        info!(
            model_calls = summary.model_calls,
            tools = summary.tools_used.len(),
            input_tokens = summary.usage.input_tokens,
            output_tokens = summary.usage.output_tokens,
            "Turn finished"
        );
        summary.text = text;
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("provider", &self.provider.name())
            .field("model_id", &self.model_id)
            .field("max_round_trips", &self.max_round_trips)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use crate::sink::{NullSink, RecordingSink, SinkEvent};
    use crate::test_helpers::*;
    use serde_json::json;
    use toolbox_core::message::Role;
    use toolbox_core::persona::Persona;
    use toolbox_core::provider::{EventStream, StreamEvent, StreamItem};
    use tokio::sync::mpsc;

    fn session() -> Session {
        Session::new(Persona::new(
            "Researcher",
            "finds things",
            "You research. Now: {now}",
            &["search", "webscrape"],
        ))
    }

    fn orchestrator(provider: Arc<ScriptedProvider>, tools: Arc<StubTools>) -> Orchestrator {
        Orchestrator::new(provider, tools, "test-model")
    }

    #[tokio::test]
    async fn plain_answer_without_tools() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            Ok(StreamEvent::TextDelta("<thinking>simple sum</thinking><answer>4".into())),
            Ok(StreamEvent::TextDelta("</answer>".into())),
            Ok(StreamEvent::TurnEnd(StopReason::EndTurn)),
            Ok(StreamEvent::Usage(TokenUsage::new(12, 3))),
        ]]));
        let tools = Arc::new(StubTools::default());
        let orch = orchestrator(provider.clone(), tools.clone());
        let mut session = session();
        let mut sink = RecordingSink::new();

        let summary = orch
            .run_turn(&mut session, UserInput::text("What's 2+2?"), &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.text, "4");
        assert_eq!(summary.model_calls, 1);
        assert!(summary.tools_used.is_empty());
        assert_eq!(summary.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(summary.usage, TokenUsage::new(12, 3));

        let messages = session.history().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].text(), "4");
        assert_eq!(
            session.display().entries().last(),
            Some(&DisplayEntry::Assistant { text: "4".into() })
        );
        assert!(tools.calls().is_empty());
        assert_eq!(sink.streamed_text(), "4");
        assert!(sink.events.contains(&SinkEvent::Final { content: "4".into() }));
    }

    #[tokio::test]
    async fn tool_round_trip_feeds_result_back() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call("tu_1", "search", &[r#"{"query":"#, r#""AI news"}"#]),
            text_call("Here are today's AI headlines."),
        ]));
        let tools = Arc::new(StubTools::default());
        let orch = orchestrator(provider.clone(), tools.clone());
        let mut session = session();
        let mut sink = RecordingSink::new();

        let summary = orch
            .run_turn(&mut session, UserInput::text("Search for AI news"), &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.model_calls, 2);
        assert_eq!(summary.tools_used, vec!["search"]);
        assert_eq!(summary.text, "Here are today's AI headlines.");
        assert_eq!(tools.calls(), vec![("search".to_string(), json!({"query": "AI news"}))]);

        let messages = session.history().messages();
        assert_eq!(messages.len(), 4);
        let tool_use = messages[1].tool_use().unwrap();
        assert_eq!(tool_use.tool_use_id, "tu_1");
        assert_eq!(tool_use.input, json!({"query": "AI news"}));
        let result = messages[2].tool_result_block().unwrap();
        assert_eq!(messages[2].role, Role::User);
        assert_eq!(result.tool_use_id, "tu_1");

        let envelope: Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert_eq!(envelope["result"][0]["title"], "AI news today");

        // The second call sees the tool exchange.
        let requests = provider.requests();
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[1].messages.len(), 3);

        let raw = SinkEvent::ToolResult {
            name: "search".into(),
            input: r#"{"query":"AI news"}"#.into(),
            result: result.content[0].text.clone(),
        };
        assert!(sink.events.contains(&raw));
        assert!(session.display().entries().iter().any(|e| matches!(
            e,
            DisplayEntry::ToolCall { name, .. } if name == "search"
        )));
    }

    #[tokio::test]
    async fn failing_tool_is_reported_to_the_model() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call("tu_9", "webscrape", &[r#"{"url":"https://example.com"}"#]),
            text_call("I couldn't fetch that page."),
        ]));
        let orch = orchestrator(provider.clone(), Arc::new(StubTools::default()));
        let mut session = session();

        let summary = orch
            .run_turn(&mut session, UserInput::text("Read example.com"), &mut NullSink)
            .await
            .unwrap();

        assert_eq!(summary.text, "I couldn't fetch that page.");
        let result = session.history().messages()[2].tool_result_block().unwrap();
        let envelope: Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert_eq!(envelope["error"], "Error in webscrape: connection refused");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn malformed_tool_input_still_round_trips() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call("tu_1", "search", &[r#"{"query": "AI"#]),
            text_call("Sorry, let me rephrase."),
        ]));
        let tools = Arc::new(StubTools::default());
        let orch = orchestrator(provider.clone(), tools.clone());
        let mut session = session();

        orch.run_turn(&mut session, UserInput::text("news?"), &mut NullSink)
            .await
            .unwrap();

        assert_eq!(tools.calls()[0].1, toolbox_core::tool::invalid_json_input());
        let result = session.history().messages()[2].tool_result_block().unwrap();
        assert!(result.content[0].text.contains("Invalid JSON input"));
    }

    #[tokio::test]
    async fn provider_failure_leaves_history_consistent() {
        let provider = Arc::new(ScriptedProvider::with_results(vec![
            Ok(tool_call("tu_1", "search", &[r#"{"query":"x"}"#])),
            Err(ProviderError::ApiError {
                status_code: 500,
                message: "boom".into(),
            }),
        ]));
        let orch = orchestrator(provider, Arc::new(StubTools::default()));
        let mut session = session();
        let mut sink = RecordingSink::new();

        let err = orch
            .run_turn(&mut session, UserInput::text("go"), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, TurnError::Provider(ProviderError::ApiError { .. })));
        let messages = session.history().messages();
        assert_eq!(messages.len(), 3);
        assert!(messages[2].tool_result_block().is_some());
        assert!(matches!(
            session.display().entries().last(),
            Some(DisplayEntry::Error { .. })
        ));
        assert!(matches!(sink.events.last(), Some(SinkEvent::Error { .. })));
        // Usage of the completed call is still counted.
        assert_eq!(session.usage(), TokenUsage::new(20, 8));
    }

    #[tokio::test]
    async fn interrupted_stream_appends_nothing_partial() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            Ok(StreamEvent::TextDelta("Half an ans".into())),
            Err(ProviderError::StreamInterrupted("connection reset".into())),
        ]]));
        let orch = orchestrator(provider, Arc::new(StubTools::default()));
        let mut session = session();
        let mut sink = RecordingSink::new();

        let err = orch
            .run_turn(&mut session, UserInput::text("hello"), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, TurnError::Provider(ProviderError::StreamInterrupted(_))));
        assert_eq!(session.history().len(), 1);
        assert_eq!(sink.streamed_text(), "Half an ans");
    }

    #[tokio::test]
    async fn stream_closing_without_turn_end_is_an_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![Ok(StreamEvent::TextDelta("cut".into()))]]));
        let orch = orchestrator(provider, Arc::new(StubTools::default()));
        let mut session = session();

        let err = orch
            .run_turn(&mut session, UserInput::text("hello"), &mut NullSink)
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Provider(ProviderError::StreamInterrupted(_))));
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn round_trip_cap_stops_the_loop() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call("tu_1", "search", &[r#"{"query":"a"}"#]),
            tool_call("tu_2", "search", &[r#"{"query":"b"}"#]),
        ]));
        let orch = orchestrator(provider.clone(), Arc::new(StubTools::default())).with_max_round_trips(2);
        let mut session = session();

        let summary = orch
            .run_turn(&mut session, UserInput::text("loop forever"), &mut NullSink)
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 2);
        assert_eq!(summary.text, ROUND_TRIP_LIMIT_NOTICE);
        assert_eq!(summary.stop_reason, None);
        let last = session.history().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.text(), ROUND_TRIP_LIMIT_NOTICE);
    }

    #[tokio::test]
    async fn empty_answer_gets_a_placeholder() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![Ok(StreamEvent::TurnEnd(
            StopReason::EndTurn,
        ))]]));
        let orch = orchestrator(provider, Arc::new(StubTools::default()));
        let mut session = session();

        let summary = orch
            .run_turn(&mut session, UserInput::text("hm"), &mut NullSink)
            .await
            .unwrap();
        assert_eq!(summary.text, EMPTY_REPLY);
        assert_eq!(session.history().last().unwrap().text(), EMPTY_REPLY);
    }

    #[tokio::test]
    async fn thinking_cut_off_by_max_tokens_never_reaches_history() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            Ok(StreamEvent::TextDelta("<thinking>user seems upset, be careful".into())),
            Ok(StreamEvent::TurnEnd(StopReason::MaxTokens)),
        ]]));
        let orch = orchestrator(provider, Arc::new(StubTools::default()));
        let mut session = session();
        let mut sink = RecordingSink::new();

        let summary = orch
            .run_turn(&mut session, UserInput::text("hello?"), &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.text, EMPTY_REPLY);
        assert_eq!(session.history().last().unwrap().text(), EMPTY_REPLY);
        assert_eq!(
            session.display().entries().last(),
            Some(&DisplayEntry::Assistant { text: EMPTY_REPLY.into() })
        );
        assert!(sink.events.contains(&SinkEvent::Final { content: EMPTY_REPLY.into() }));
        assert_eq!(sink.streamed_text(), "");
    }

    #[tokio::test]
    async fn consulted_model_usage_counts_toward_the_session() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call("tu_1", "consult_agent", &["{\"query\":\"who?\"}"]),
            text_call("Done."),
        ]));
        let orch = orchestrator(provider, Arc::new(StubTools::default()));
        let mut session = session();
        let mut sink = RecordingSink::new();

        let summary = orch
            .run_turn(&mut session, UserInput::text("ask around"), &mut sink)
            .await
            .unwrap();

        // 20/8 and 10/5 from the two model calls plus the consultation.
        assert_eq!(summary.usage, TokenUsage::new(37, 17));
        assert_eq!(session.usage(), TokenUsage::new(37, 17));
        assert!(sink.events.contains(&SinkEvent::Usage { usage: CONSULT_USAGE }));
    }

    #[tokio::test]
    async fn usage_accumulates_across_turns() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call("tu_1", "search", &["{\"query\":\"x\"}"]),
            text_call("first"),
            text_call("second"),
        ]));
        let orch = orchestrator(provider, Arc::new(StubTools::default()));
        let mut session = session();
        let mut sink = RecordingSink::new();

        let first = orch
            .run_turn(&mut session, UserInput::text("one"), &mut sink)
            .await
            .unwrap();
        assert_eq!(first.usage, TokenUsage::new(30, 13));

        let second = orch
            .run_turn(&mut session, UserInput::text("two"), &mut sink)
            .await
            .unwrap();
        assert_eq!(second.usage, TokenUsage::new(10, 5));
        assert_eq!(session.usage(), TokenUsage::new(40, 18));

        let reported = sink
            .events
            .iter()
            .filter(|e| matches!(e, SinkEvent::Usage { .. }))
            .count();
        assert_eq!(reported, 3);
    }

    #[tokio::test]
    async fn request_carries_prompt_and_tools() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_call("hi")]));
        let orch = orchestrator(provider.clone(), Arc::new(StubTools::default()))
            .with_additional_fields(json!({"top_k": 250}));
        let mut session = session();

        orch.run_turn(&mut session, UserInput::text("hello"), &mut NullSink)
            .await
            .unwrap();

        let request = &provider.requests()[0];
        assert_eq!(request.model_id, "test-model");
        assert_eq!(request.system[0], SystemPrompt::new(session.system_prompt()));
        assert!(!session.system_prompt().contains("{now}"));
        assert_eq!(request.additional_model_request_fields, json!({"top_k": 250}));
        let tool_config = request.tool_config.as_ref().unwrap();
        assert_eq!(tool_config.tools.len(), 3);
    }

    /// Hands out a stream the test feeds by hand.
    struct GatedProvider {
        rx: std::sync::Mutex<Option<mpsc::Receiver<StreamItem>>>,
    }

    #[async_trait::async_trait]
    impl ModelProvider for GatedProvider {
        fn name(&self) -> &str {
            "gated"
        }

        async fn open(&self, _request: ConverseRequest) -> Result<EventStream, ProviderError> {
            let rx = self.rx.lock().unwrap().take().expect("opened once");
            Ok(EventStream::new(rx))
        }
    }

    #[tokio::test]
    async fn second_submit_while_running_is_rejected() {
        let (tx, rx) = mpsc::channel(8);
        let provider = Arc::new(GatedProvider {
            rx: std::sync::Mutex::new(Some(rx)),
        });
        let orch = Arc::new(Orchestrator::new(provider, Arc::new(StubTools::default()), "m"));
        let handle = SessionHandle::new(session());

        let running = {
            let orch = orch.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .submit(&orch, UserInput::text("first"), &mut NullSink)
                    .await
            })
        };
        while !handle.is_busy() {
            tokio::task::yield_now().await;
        }

        let rejected = handle
            .submit(&orch, UserInput::text("second"), &mut NullSink)
            .await;
        assert!(matches!(rejected, Err(TurnError::TurnInFlight)));

        tx.send(Ok(StreamEvent::TextDelta("done".into()))).await.unwrap();
        tx.send(Ok(StreamEvent::TurnEnd(StopReason::EndTurn))).await.unwrap();
        drop(tx);

        let summary = running.await.unwrap().unwrap();
        assert_eq!(summary.text, "done");
        let session = handle.lock().await;
        assert_eq!(session.history().len(), 2);
    }
}
