//! Built-in tools for Toolbox.
//!
//! Tools give the agent the ability to interact with the world: search and
//! scrape the web, read feeds, keep long-term memories, run code and ask a
//! second model for help. The set is closed ([`ToolKind`]); a persona picks a
//! subset of it and a [`Toolbox`] executes calls against that subset.

pub mod consult;
pub mod fetch;
pub mod memory_tools;
pub mod registry;
pub mod rss;
pub mod search;
pub mod shell;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use toolbox_config::AppConfig;
use toolbox_core::error::ToolError;
use toolbox_core::memory::MemoryStore;
use toolbox_core::persona::Persona;
use toolbox_core::tool::{ToolDescriptor, ToolExecutor};
use toolbox_core::usage::TokenUsage;
use tracing::{debug, info};

pub use consult::{Consultant, Consultation};
pub use registry::{ToolInput, ToolKind};
pub use shell::{PythonRunner, ShellRunner};

/// Page text handed back by `webscrape` is cut to this many characters.
const MAX_PAGE_CHARS: usize = 20_000;

/// Tunables for the leaf tools.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub python_bin: String,
    pub exec_timeout_secs: u64,
    pub shell_allowlist: Vec<String>,
    pub search_max_results: usize,
    pub http_timeout_secs: u64,
    pub recall_limit: usize,
    /// Overrides the search endpoint (tests, mirrors).
    pub search_url: Option<String>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl ToolSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            python_bin: config.tools.python_bin.clone(),
            exec_timeout_secs: config.tools.exec_timeout_secs,
            shell_allowlist: config.tools.shell_allowlist.clone(),
            search_max_results: config.tools.search_max_results,
            http_timeout_secs: config.tools.http_timeout_secs,
            recall_limit: config.memory.recall_limit,
            search_url: None,
        }
    }
}

/// The tool executor for one session: a persona's subset of [`ToolKind`]
/// plus the collaborators those tools need.
pub struct Toolbox {
    enabled: Vec<ToolKind>,
    memory: Arc<dyn MemoryStore>,
    consultant: Option<Consultant>,
    http: reqwest::Client,
    shell: ShellRunner,
    python: PythonRunner,
    settings: ToolSettings,
    /// Usage of `consult_agent` calls not yet taken by the orchestrator.
    pending_usage: Mutex<TokenUsage>,
}

impl Toolbox {
    pub fn new(
        enabled: Vec<ToolKind>,
        memory: Arc<dyn MemoryStore>,
        settings: ToolSettings,
    ) -> Result<Self, ToolError> {
        let timeout = Duration::from_secs(settings.exec_timeout_secs);
        Ok(Self {
            enabled,
            memory,
            consultant: None,
            http: fetch::http_client(settings.http_timeout_secs)?,
            shell: ShellRunner::new(settings.shell_allowlist.clone(), timeout),
            python: PythonRunner::new(settings.python_bin.clone(), timeout),
            settings,
            pending_usage: Mutex::new(TokenUsage::default()),
        })
    }

    /// Build the executor for a persona. A persona naming a tool that does
    /// not exist is rejected.
    pub fn for_persona(
        persona: &Persona,
        memory: Arc<dyn MemoryStore>,
        settings: ToolSettings,
    ) -> Result<Self, ToolError> {
        let enabled = resolve_tools(&persona.tools)?;
        debug!(persona = %persona.name, tools = enabled.len(), "Building toolbox");
        Self::new(enabled, memory, settings)
    }

    /// Every built-in tool.
    pub fn all(memory: Arc<dyn MemoryStore>, settings: ToolSettings) -> Result<Self, ToolError> {
        Self::new(ToolKind::ALL.to_vec(), memory, settings)
    }

    pub fn with_consultant(mut self, consultant: Consultant) -> Self {
        self.consultant = Some(consultant);
        self
    }

    pub fn enabled(&self) -> &[ToolKind] {
        &self.enabled
    }

    /// Look up an enabled tool by its exact wire name.
    pub fn lookup(&self, name: &str) -> Result<ToolKind, ToolError> {
        ToolKind::from_name(name)
            .filter(|kind| self.enabled.contains(kind))
            .ok_or_else(|| ToolError::UnknownTool(name.into()))
    }

    /// Run an already validated invocation.
    pub async fn dispatch(&self, input: ToolInput) -> Result<Value, ToolError> {
        let memory = self.memory.as_ref();
        match input {
            ToolInput::Search(i) => {
                let max = i.max_results.unwrap_or(self.settings.search_max_results).max(1);
                let hits = search::search(&self.http, self.settings.search_url.as_deref(), &i.query, max).await?;
                to_value("search", hits)
            }
            ToolInput::Webscrape(i) => {
                let html = fetch::get_text(&self.http, "webscrape", &i.url).await?;
                let text = fetch::html_to_text(&html);
                if text.is_empty() {
                    return Err(ToolError::failed("webscrape", format!("no readable text at {}", i.url)));
                }
                Ok(Value::String(fetch::truncate_chars(&text, MAX_PAGE_CHARS)))
            }
            ToolInput::RssFeed(i) => to_value("rss_feed", rss::fetch_feed(&self.http, &i.url, i.num_entries).await?),
            ToolInput::SaveMemory(i) => memory_tools::save(memory, i).await,
            ToolInput::RecallMemories(i) => memory_tools::recall(memory, i, self.settings.recall_limit).await,
            ToolInput::UpdateMemory(i) => memory_tools::update(memory, i).await,
            ToolInput::DeleteMemory(i) => memory_tools::delete(memory, i).await,
            ToolInput::ListAllMemories => memory_tools::list(memory).await,
            ToolInput::GetUserProfile => memory_tools::get_profile(memory).await,
            ToolInput::UpdateUserProfile(i) => memory_tools::set_profile(memory, i).await,
            ToolInput::ExecutePythonCode(i) => to_value("execute_python_code", self.python.run(&i.code).await?),
            ToolInput::ExecuteShellCommand(i) => {
                to_value("execute_shell_command", self.shell.run(&i.command).await?)
            }
            ToolInput::ConsultAgent(i) => {
                let consultant = self
                    .consultant
                    .as_ref()
                    .ok_or_else(|| ToolError::failed("consult_agent", "no model provider is configured"))?;
                let consultation = consultant.ask(&i.query).await?;
                self.pending_usage.lock().await.add(&consultation.usage);
                if consultation.answer.trim().is_empty() {
                    return Err(ToolError::failed("consult_agent", "the consulted agent returned no answer"));
                }
                Ok(Value::String(consultation.answer))
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for Toolbox {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.enabled.iter().map(|k| k.descriptor()).collect()
    }

    async fn execute(&self, name: &str, input: Value) -> Result<Value, ToolError> {
        let kind = self.lookup(name)?;
        let typed = kind.parse_input(input)?;

        info!(tool = %kind, "Executing tool");
        let start = Instant::now();
        let result = self.dispatch(typed).await;
        debug!(
            tool = %kind,
            ok = result.is_ok(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tool finished"
        );
        result
    }

    async fn take_usage(&self) -> TokenUsage {
        std::mem::take(&mut *self.pending_usage.lock().await)
    }
}

/// Map persona tool names onto the registry, keeping order and dropping duplicates.
pub fn resolve_tools(names: &[String]) -> Result<Vec<ToolKind>, ToolError> {
    let mut kinds = Vec::with_capacity(names.len());
    for name in names {
        let kind = ToolKind::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.clone()))?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

fn to_value<T: serde::Serialize>(tool: &str, value: T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::failed(tool, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolbox_core::error::ProviderError;
    use toolbox_core::persona::builtin_personas;
    use toolbox_core::provider::{
        ConverseRequest, EventStream, InferenceConfig, ModelProvider, StopReason, StreamEvent,
    };
    use toolbox_core::tool::{envelope_error, invalid_json_input};
    use toolbox_memory::{HashingEmbedder, InMemoryStore};

    fn memory() -> Arc<dyn MemoryStore> {
        Arc::new(InMemoryStore::new(HashingEmbedder::shared()))
    }

    fn toolbox(kinds: &[ToolKind]) -> Toolbox {
        Toolbox::new(kinds.to_vec(), memory(), ToolSettings::default()).unwrap()
    }

    #[test]
    fn every_builtin_persona_resolves() {
        for persona in builtin_personas() {
            let toolbox = Toolbox::for_persona(&persona, memory(), ToolSettings::default())
                .unwrap_or_else(|e| panic!("{}: {e}", persona.name));
            assert_eq!(toolbox.enabled().len(), persona.tools.len(), "{}", persona.name);
        }
    }

    #[test]
    fn persona_with_unknown_tool_is_rejected() {
        let persona = Persona::new("Broken", "", "prompt", &["search", "teleport"]);
        let err = Toolbox::for_persona(&persona, memory(), ToolSettings::default())
            .err()
            .unwrap();
        assert_eq!(err, ToolError::UnknownTool("teleport".into()));
    }

    #[test]
    fn descriptors_follow_persona_order() {
        let tb = toolbox(&[ToolKind::Webscrape, ToolKind::Search]);
        let names: Vec<String> = tb.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["webscrape", "search"]);
        let config = tb.tool_config().unwrap();
        assert_eq!(config.tools.len(), 2);
    }

    #[test]
    fn empty_toolbox_sends_no_tool_config() {
        assert!(toolbox(&[]).tool_config().is_none());
    }

    #[tokio::test]
    async fn tool_outside_persona_is_unknown() {
        let tb = toolbox(&[ToolKind::Search]);
        let err = tb.execute("save_memory", json!({"text": "x"})).await.unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("save_memory".into()));
    }

    #[tokio::test]
    async fn invalid_json_placeholder_yields_error_envelope() {
        let tb = toolbox(&[ToolKind::SaveMemory]);
        let raw = tb.process("save_memory", invalid_json_input()).await;
        let envelope: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            envelope_error(&envelope),
            Some("Invalid input for save_memory: Invalid JSON input")
        );
    }

    #[tokio::test]
    async fn memory_tools_through_executor() {
        let tb = toolbox(&[ToolKind::SaveMemory, ToolKind::RecallMemories]);
        let raw = tb.process("save_memory", json!({"text": "user likes hiking"})).await;
        assert!(raw.contains("Memory saved: user likes hiking..."));

        let raw = tb.process("recall_memories", json!({"query": "likes hiking"})).await;
        let envelope: Value = serde_json::from_str(&raw).unwrap();
        assert!(envelope_error(&envelope).is_none());
        assert_eq!(envelope["result"][0]["text"], "user likes hiking");
    }

    #[tokio::test]
    async fn consult_without_provider_fails_softly() {
        let tb = toolbox(&[ToolKind::ConsultAgent]);
        let raw = tb.process("consult_agent", json!({"query": "hi"})).await;
        assert!(raw.contains("Error in consult_agent: no model provider is configured"));
    }

    /// Answers every call with the same text and usage.
    struct MeteredProvider {
        answer: &'static str,
    }

    #[async_trait]
    impl ModelProvider for MeteredProvider {
        fn name(&self) -> &str {
            "metered"
        }

        async fn open(&self, _request: ConverseRequest) -> Result<EventStream, ProviderError> {
            Ok(EventStream::from_events(vec![
                Ok(StreamEvent::TextDelta(self.answer.into())),
                Ok(StreamEvent::TurnEnd(StopReason::EndTurn)),
                Ok(StreamEvent::Usage(TokenUsage::new(12, 6))),
            ]))
        }
    }

    fn consulting_toolbox(answer: &'static str) -> Toolbox {
        toolbox(&[ToolKind::ConsultAgent]).with_consultant(Consultant::new(
            Arc::new(MeteredProvider { answer }),
            "m",
            InferenceConfig::default(),
        ))
    }

    #[tokio::test]
    async fn consult_usage_is_taken_once() {
        let tb = consulting_toolbox("Ask the librarian.");
        assert!(tb.take_usage().await.is_empty());

        let raw = tb.process("consult_agent", json!({"query": "where are the books?"})).await;
        assert_eq!(raw, r#"{"result":"Ask the librarian."}"#);
        assert_eq!(tb.take_usage().await, TokenUsage::new(12, 6));
        assert!(tb.take_usage().await.is_empty());
    }

    #[tokio::test]
    async fn empty_consultation_still_reports_usage() {
        let tb = consulting_toolbox("  ");
        let raw = tb.process("consult_agent", json!({"query": "anyone?"})).await;
        assert!(raw.contains("Error in consult_agent: the consulted agent returned no answer"));
        assert_eq!(tb.take_usage().await, TokenUsage::new(12, 6));
    }

    #[tokio::test]
    async fn unreachable_page_is_an_error_in_webscrape() {
        let tb = toolbox(&[ToolKind::Webscrape]);
        let raw = tb.process("webscrape", json!({"url": "http://127.0.0.1:9/"})).await;
        let envelope: Value = serde_json::from_str(&raw).unwrap();
        assert!(envelope_error(&envelope).unwrap().starts_with("Error in webscrape: "));
    }
}
