//! The closed tool registry.
//!
//! Every tool the agent can call is a [`ToolKind`] variant. Names, descriptions
//! and input schemas are fixed here; raw model input is validated against the
//! schema and then deserialised into a [`ToolInput`] before anything runs.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use toolbox_core::error::ToolError;
use toolbox_core::tool::{ToolDescriptor, input_error, validate_input};

/// Every built-in tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Search,
    Webscrape,
    RssFeed,
    SaveMemory,
    RecallMemories,
    UpdateMemory,
    DeleteMemory,
    ListAllMemories,
    GetUserProfile,
    UpdateUserProfile,
    ExecutePythonCode,
    ExecuteShellCommand,
    ConsultAgent,
}

impl ToolKind {
    pub const ALL: [ToolKind; 13] = [
        ToolKind::Search,
        ToolKind::Webscrape,
        ToolKind::RssFeed,
        ToolKind::SaveMemory,
        ToolKind::RecallMemories,
        ToolKind::UpdateMemory,
        ToolKind::DeleteMemory,
        ToolKind::ListAllMemories,
        ToolKind::GetUserProfile,
        ToolKind::UpdateUserProfile,
        ToolKind::ExecutePythonCode,
        ToolKind::ExecuteShellCommand,
        ToolKind::ConsultAgent,
    ];

    /// The wire name the model uses.
    pub fn name(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Webscrape => "webscrape",
            Self::RssFeed => "rss_feed",
            Self::SaveMemory => "save_memory",
            Self::RecallMemories => "recall_memories",
            Self::UpdateMemory => "update_memory",
            Self::DeleteMemory => "delete_memory",
            Self::ListAllMemories => "list_all_memories",
            Self::GetUserProfile => "get_user_profile",
            Self::UpdateUserProfile => "update_user_profile",
            Self::ExecutePythonCode => "execute_python_code",
            Self::ExecuteShellCommand => "execute_shell_command",
            Self::ConsultAgent => "consult_agent",
        }
    }

    /// Exact-match lookup.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Search => {
                "Search the web using DuckDuckGo. Use it to find current information, articles, \
                 websites and more. Provide a query and the tool returns a list of results with \
                 title, link and snippet."
            }
            Self::Webscrape => {
                "Scrape the content of a webpage and return its visible text. Use it to read a page \
                 found through search before answering from it."
            }
            Self::RssFeed => {
                "Fetch and parse an RSS or Atom feed, returning the latest entries. Useful for recent \
                 news or updates from a known source."
            }
            Self::SaveMemory => {
                "Save an important piece of information for later recall. Use this when you encounter \
                 information that might be useful in future conversations."
            }
            Self::RecallMemories => {
                "Recall relevant memories based on a query. Use this at the start of conversations or \
                 when you need previously saved information."
            }
            Self::UpdateMemory => "Replace the text of an existing memory, addressed by its id.",
            Self::DeleteMemory => "Delete a memory by its id.",
            Self::ListAllMemories => "List every saved memory with its id and metadata.",
            Self::GetUserProfile => {
                "Read the stored user profile. Check it at the start of a conversation to personalise \
                 answers."
            }
            Self::UpdateUserProfile => {
                "Replace the stored user profile with an updated summary of what you know about the user."
            }
            Self::ExecutePythonCode => {
                "Execute Python code and return its printed output. Use print() for anything you want \
                 to see."
            }
            Self::ExecuteShellCommand => {
                "Execute a shell command and return stdout, stderr and the exit code."
            }
            Self::ConsultAgent => {
                "Ask a general-purpose assistant a self-contained question and get its written answer. \
                 The assistant has no access to this conversation."
            }
        }
    }

    pub fn input_schema(self) -> Value {
        match self {
            Self::Search => object_schema(
                json!({
                    "query": string_prop("The search query. Any string of text you want to search for."),
                    "max_results": { "type": "integer", "description": "Maximum number of results. Default is 5." }
                }),
                &["query"],
            ),
            Self::Webscrape => object_schema(
                json!({
                    "url": string_prop("The URL of the webpage to scrape, including the http:// or https:// prefix.")
                }),
                &["url"],
            ),
            Self::RssFeed => object_schema(
                json!({
                    "url": string_prop("The URL of the RSS feed to fetch."),
                    "num_entries": { "type": "integer", "description": "The number of entries to return. Default is 5." }
                }),
                &["url"],
            ),
            Self::SaveMemory => object_schema(
                json!({
                    "text": string_prop("The text to save as a memory."),
                    "metadata": { "type": "object", "description": "Optional key/value tags stored with the memory." }
                }),
                &["text"],
            ),
            Self::RecallMemories => object_schema(
                json!({
                    "query": string_prop("The query to search for in the saved memories."),
                    "k": { "type": "integer", "description": "How many memories to return." }
                }),
                &["query"],
            ),
            Self::UpdateMemory => object_schema(
                json!({
                    "id": string_prop("The id of the memory to update."),
                    "text": string_prop("The new memory text."),
                    "metadata": { "type": "object", "description": "Replacement metadata." }
                }),
                &["id", "text"],
            ),
            Self::DeleteMemory => object_schema(
                json!({ "id": string_prop("The id of the memory to delete.") }),
                &["id"],
            ),
            Self::ListAllMemories | Self::GetUserProfile => object_schema(json!({}), &[]),
            Self::UpdateUserProfile => object_schema(
                json!({ "profile": string_prop("The full updated user profile.") }),
                &["profile"],
            ),
            Self::ExecutePythonCode => object_schema(
                json!({ "code": string_prop("The Python source to run.") }),
                &["code"],
            ),
            Self::ExecuteShellCommand => object_schema(
                json!({ "command": string_prop("The shell command to execute.") }),
                &["command"],
            ),
            Self::ConsultAgent => object_schema(
                json!({ "query": string_prop("The question to ask, with all the context it needs.") }),
                &["query"],
            ),
        }
    }

    pub fn descriptor(self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().into(),
            description: self.description().into(),
            input_schema: self.input_schema(),
        }
    }

    /// Validate raw model input and turn it into the typed input for this tool.
    pub fn parse_input(self, input: Value) -> Result<ToolInput, ToolError> {
        if let Some(reason) = input_error(&input) {
            return Err(ToolError::invalid(self.name(), reason));
        }
        validate_input(&self.input_schema(), &input).map_err(|r| ToolError::invalid(self.name(), r))?;

        Ok(match self {
            Self::Search => ToolInput::Search(typed(self, input)?),
            Self::Webscrape => ToolInput::Webscrape(typed(self, input)?),
            Self::RssFeed => ToolInput::RssFeed(typed(self, input)?),
            Self::SaveMemory => ToolInput::SaveMemory(typed(self, input)?),
            Self::RecallMemories => ToolInput::RecallMemories(typed(self, input)?),
            Self::UpdateMemory => ToolInput::UpdateMemory(typed(self, input)?),
            Self::DeleteMemory => ToolInput::DeleteMemory(typed(self, input)?),
            Self::ListAllMemories => ToolInput::ListAllMemories,
            Self::GetUserProfile => ToolInput::GetUserProfile,
            Self::UpdateUserProfile => ToolInput::UpdateUserProfile(typed(self, input)?),
            Self::ExecutePythonCode => ToolInput::ExecutePythonCode(typed(self, input)?),
            Self::ExecuteShellCommand => ToolInput::ExecuteShellCommand(typed(self, input)?),
            Self::ConsultAgent => ToolInput::ConsultAgent(typed(self, input)?),
        })
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn string_prop(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn typed<T: DeserializeOwned>(kind: ToolKind, input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::invalid(kind.name(), e.to_string()))
}

// ── Typed inputs ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchInput {
    pub query: String,
    #[serde(default)]
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UrlInput {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RssInput {
    pub url: String,
    #[serde(default = "default_num_entries")]
    pub num_entries: usize,
}

fn default_num_entries() -> usize {
    5
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SaveMemoryInput {
    pub text: String,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecallInput {
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdateMemoryInput {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdInput {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProfileInput {
    pub profile: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CodeInput {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandInput {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryInput {
    pub query: String,
}

/// A validated, strongly typed tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInput {
    Search(SearchInput),
    Webscrape(UrlInput),
    RssFeed(RssInput),
    SaveMemory(SaveMemoryInput),
    RecallMemories(RecallInput),
    UpdateMemory(UpdateMemoryInput),
    DeleteMemory(IdInput),
    ListAllMemories,
    GetUserProfile,
    UpdateUserProfile(ProfileInput),
    ExecutePythonCode(CodeInput),
    ExecuteShellCommand(CommandInput),
    ConsultAgent(QueryInput),
}
