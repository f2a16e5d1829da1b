//! `toolbox chat`: Interactive or single-message chat mode.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use toolbox_agent::{Orchestrator, PresentationSink, Session, TurnError};
use toolbox_config::AppConfig;
use toolbox_core::display::format_tool_result;
use toolbox_core::memory::MemoryStore;
use toolbox_core::message::{Attachment, UserInput};
use toolbox_core::provider::ModelProvider;
use toolbox_core::usage::{TokenUsage, estimate_cost};

use super::{build_tools, load_config, open_memory, select_persona};

/// Tool output longer than this is cut in the terminal (History keeps all of it).
const MAX_TOOL_PREVIEW_LINES: usize = 12;

/// Writes the streamed answer to stdout as it arrives.
#[derive(Debug, Default)]
pub struct TerminalSink {
    streamed: bool,
}

impl TerminalSink {
    fn flush() {
        let _ = std::io::stdout().flush();
    }
}

impl PresentationSink for TerminalSink {
    fn on_text_delta(&mut self, text: &str) {
        if !self.streamed {
            print!("  Assistant > ");
            self.streamed = true;
        }
        print!("{text}");
        Self::flush();
    }

    fn on_tool_start(&mut self, name: &str) {
        if self.streamed {
            println!();
            self.streamed = false;
        }
        println!("  [tool] {name} ...");
    }

    fn on_tool_result(&mut self, name: &str, input: &str, result: &str) {
        println!("  [tool] {name} {input}");
        for line in preview(&format_tool_result(result)) {
            println!("         {line}");
        }
    }

    fn on_turn_final(&mut self, text: &str) {
        // Text that was never streamed (placeholders, limit notices) is printed whole.
        if self.streamed {
            println!();
        } else {
            for line in text.lines() {
                println!("  Assistant > {line}");
            }
        }
        println!();
        self.streamed = false;
    }

    fn on_usage(&mut self, _usage: &TokenUsage) {}

    fn on_error(&mut self, message: &str) {
        if self.streamed {
            println!();
            self.streamed = false;
        }
        eprintln!("  [Error] {message}");
    }
}

fn preview(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = lines
        .iter()
        .take(MAX_TOOL_PREVIEW_LINES)
        .map(|l| l.to_string())
        .collect();
    if lines.len() > MAX_TOOL_PREVIEW_LINES {
        out.push(format!("... ({} more lines)", lines.len() - MAX_TOOL_PREVIEW_LINES));
    }
    out
}

async fn read_attachment(path: &Path) -> anyhow::Result<Attachment> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read attachment {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".into());
    Ok(Attachment::new(file_name, bytes))
}

fn usage_line(model_id: &str, usage: &TokenUsage) -> String {
    let cost = estimate_cost(model_id, usage)
        .map(|c| format!("${c:.4}"))
        .unwrap_or_else(|| "unknown".into());
    format!(
        "Tokens: {} in / {} out / {} total — estimated cost {cost}",
        usage.input_tokens, usage.output_tokens, usage.total_tokens
    )
}

/// Everything a chat needs besides the session itself.
struct Chat {
    config: AppConfig,
    provider: Arc<dyn ModelProvider>,
    memory: Arc<dyn MemoryStore>,
    orchestrator: Orchestrator,
}

impl Chat {
    async fn turn(&self, session: &mut Session, input: UserInput) {
        let mut sink = TerminalSink::default();
        match self.orchestrator.run_turn(session, input, &mut sink).await {
            Ok(summary) => tracing::debug!(
                model_calls = summary.model_calls,
                tools = summary.tools_used.len(),
                "Turn done"
            ),
            // Already shown through the sink.
            Err(TurnError::Provider(_)) => {}
            Err(e) => eprintln!("  [Error] {e}"),
        }
    }

    /// Handle a `/command`. Returns `false` when the chat should end.
    fn command(&mut self, session: &mut Session, line: &str) -> anyhow::Result<bool> {
        let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
        match cmd {
            "/exit" | "/quit" => return Ok(false),
            "/new" => {
                session.new_chat();
                println!("  Started a new chat with {}.", session.persona().name);
            }
            "/usage" => println!("  {}", usage_line(&self.config.provider.model_id, &session.usage())),
            "/persona" if arg.trim().is_empty() => {
                println!("  Current persona: {}", session.persona().name);
                for p in self.config.personas() {
                    println!("    - {} — {}", p.name, p.description);
                }
            }
            "/persona" => match select_persona(&self.config, Some(arg.trim())) {
                Ok(persona) => {
                    let tools = build_tools(&self.config, &persona, self.memory.clone(), self.provider.clone())?;
                    self.orchestrator = Orchestrator::from_config(&self.config, self.provider.clone(), tools);
                    println!("  Switched to {}.", persona.name);
                    session.set_persona(persona);
                }
                Err(e) => eprintln!("  [Error] {e}"),
            },
            other => println!("  Unknown command {other}. Try /new, /usage, /persona [name] or /exit."),
        }
        Ok(true)
    }
}

pub async fn run(persona: Option<String>, message: Option<String>, attach: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config()?;
    let persona = select_persona(&config, persona.as_deref())?;
    let provider = toolbox_providers::build_from_config(&config)?;
    let memory = open_memory(&config).await?;
    let tools = build_tools(&config, &persona, memory.clone(), provider.clone())?;
    let orchestrator = Orchestrator::from_config(&config, provider.clone(), tools);

    let mut attachment = match &attach {
        Some(path) => Some(read_attachment(path).await?),
        None => None,
    };
    let mut session = Session::new(persona);
    let mut chat = Chat {
        config,
        provider,
        memory,
        orchestrator,
    };

    if let Some(msg) = message {
        let mut input = UserInput::text(msg);
        if let Some(a) = attachment.take() {
            input = input.with_attachment(a);
        }
        chat.turn(&mut session, input).await;
        return Ok(());
    }

    println!();
    println!("  Toolbox — Interactive Mode");
    println!();
    println!("  Persona:   {}", session.persona().name);
    println!("  Model:     {}", chat.orchestrator.model_id());
    println!("  Tools:     {}", session.persona().tools.join(", "));
    if let Some(path) = &attach {
        println!("  Attached:  {} (sent with your first message)", path.display());
    }
    println!();
    println!("  Commands: /new, /usage, /persona [name], /exit");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('/') {
            if !chat.command(&mut session, line)? {
                break;
            }
            continue;
        }

        let mut input = UserInput::text(line);
        if let Some(a) = attachment.take() {
            input = input.with_attachment(a);
        }
        chat.turn(&mut session, input).await;
    }

    println!();
    println!("  {}", usage_line(chat.orchestrator.model_id(), &session.usage()));
    println!("  Goodbye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_cuts_long_output() {
        let text = (1..=20).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let lines = preview(&text);
        assert_eq!(lines.len(), MAX_TOOL_PREVIEW_LINES + 1);
        assert_eq!(lines.last().unwrap(), "... (8 more lines)");
    }

    #[test]
    fn usage_line_without_pricing() {
        let line = usage_line("some-unknown-model", &TokenUsage::new(100, 50));
        assert!(line.contains("100 in / 50 out / 150 total"));
        assert!(line.ends_with("unknown"));
    }
}
