//! Personas: a system prompt plus a named subset of the tool registry.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Placeholder in a persona prompt replaced by the session start time.
pub const NOW_PLACEHOLDER: &str = "{now}";

const ANSWER_CONVENTION: &str = "Think through your response in one sentence inside <thinking></thinking> tags, \
then give your final response inside <answer></answer> tags.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
}

impl Persona {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
        tools: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// The system prompt with the current time filled in.
    pub fn render_prompt(&self, now: DateTime<Local>) -> String {
        self.system_prompt
            .replace(NOW_PLACEHOLDER, &now.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

/// The personas available out of the box.
pub fn builtin_personas() -> Vec<Persona> {
    vec![
        Persona::new(
            "Personal Assistant",
            "A versatile assistant that gets to know the user and uses tools proactively.",
            format!(
                "You are ToolboxAI, a personalized assistant. Current date/time: {NOW_PLACEHOLDER}\n\
                 Read the user profile for your own understanding; only mention personal details when relevant. \
                 Use your tools whenever real-time data or memory would help. {ANSWER_CONVENTION}"
            ),
            &[
                "get_user_profile",
                "update_user_profile",
                "save_memory",
                "recall_memories",
                "search",
                "webscrape",
                "rss_feed",
            ],
        ),
        Persona::new(
            "Crypto Investor",
            "Cryptocurrency markets and investment analysis.",
            format!(
                "You are CryptoAdvisor, focused on cryptocurrency markets. Current date/time: {NOW_PLACEHOLDER}\n\
                 Gather current prices, news and sentiment with your tools before answering. {ANSWER_CONVENTION}"
            ),
            &["search", "webscrape", "rss_feed"],
        ),
        Persona::new(
            "Funny AI",
            "An assistant with a sense of humor.",
            format!("You are JokesterAI, an assistant with a sense of humor. Current date/time: {NOW_PLACEHOLDER}"),
            &["search"],
        ),
        Persona::new(
            "Self Evolving AI",
            "Uses tools for research and keeps its own instructions in memory.",
            format!(
                "You are a self-evolving assistant. Start each conversation by recalling your instructions from memory; \
                 if none exist, write and save an initial set. Refine them as you learn. \
                 Current date/time: {NOW_PLACEHOLDER}"
            ),
            &[
                "execute_python_code",
                "search",
                "webscrape",
                "save_memory",
                "recall_memories",
                "update_memory",
            ],
        ),
        Persona::new(
            "Knowledge Curator",
            "Manages and synthesizes a persistent knowledge base.",
            format!(
                "You are Knowledge Curator. Current date/time: {NOW_PLACEHOLDER}\n\
                 Always consult the knowledge base with recall_memories before answering, be explicit about what \
                 it did and did not contain, and offer to save new useful facts with save_memory. {ANSWER_CONVENTION}"
            ),
            &["recall_memories", "save_memory", "search", "execute_python_code"],
        ),
        Persona::new(
            "AI in Docker",
            "Runs inside a container with shell and Python access.",
            format!(
                "You are running inside a container you fully control. Use shell commands and Python to inspect and \
                 change your environment, and save what you learn for future sessions. When you run a shell command, \
                 report both the command and its output. {ANSWER_CONVENTION}\nCurrent date/time: {NOW_PLACEHOLDER}"
            ),
            &[
                "execute_python_code",
                "recall_memories",
                "save_memory",
                "search",
                "execute_shell_command",
            ],
        ),
        Persona::new(
            "Agent Consultant",
            "Delegates open-ended questions to a general-purpose sub-agent.",
            format!(
                "You are a coordinator. For broad or open-ended questions, ask the general sub-agent with \
                 consult_agent and build on its answer. Current date/time: {NOW_PLACEHOLDER}\n{ANSWER_CONVENTION}"
            ),
            &["consult_agent", "search"],
        ),
    ]
}

/// Find a persona by case-insensitive name.
pub fn find_persona<'a>(personas: &'a [Persona], name: &str) -> Option<&'a Persona> {
    personas.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn builtins_have_unique_names() {
        let personas = builtin_personas();
        let mut names: Vec<_> = personas.iter().map(|p| p.name.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), personas.len());
    }

    #[test]
    fn prompt_renders_time() {
        let persona = find_persona(&builtin_personas(), "funny ai").unwrap().clone();
        let now = Local.with_ymd_and_hms(2024, 7, 1, 9, 30, 0).unwrap();
        let prompt = persona.render_prompt(now);
        assert!(prompt.contains("2024-07-01 09:30:00"));
        assert!(!prompt.contains(NOW_PLACEHOLDER));
    }
}
