//! Configuration loading, validation, and management for Toolbox.
//!
//! Loads configuration from `~/.toolbox/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use toolbox_core::provider::InferenceConfig;
use toolbox_core::{Persona, builtin_personas, find_persona};

/// The root configuration structure.
///
/// Maps directly to `~/.toolbox/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub inference: InferenceSettings,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    /// User-defined personas; a name matching a built-in replaces it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub personas: Vec<Persona>,
}

/// Which streaming backend to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Bedrock,
    Anthropic,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bedrock => f.write_str("bedrock"),
            Self::Anthropic => f.write_str("anthropic"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bedrock" => Ok(Self::Bedrock),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(ConfigError::ValidationError(format!("unknown provider '{other}'"))),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    #[serde(default = "default_model")]
    pub model_id: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Bearer token (Bedrock) or API key (Anthropic)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the endpoint, e.g. for a proxy or a local mock
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_model() -> String {
    "anthropic.claude-3-5-sonnet-20240620-v1:0".into()
}
fn default_region() -> String {
    "us-east-1".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            model_id: default_model(),
            region: default_region(),
            api_key: None,
            base_url: None,
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("model_id", &self.model_id)
            .field("region", &self.region)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Passed through untouched as `additionalModelRequestFields`
    #[serde(default = "default_additional_fields")]
    pub additional_model_fields: Map<String, Value>,
}

fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> Option<u32> {
    Some(4096)
}
fn default_additional_fields() -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("top_k".into(), Value::from(200));
    fields
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: None,
            additional_model_fields: default_additional_fields(),
        }
    }
}

impl InferenceSettings {
    pub fn to_inference_config(&self) -> InferenceConfig {
        InferenceConfig {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }

    pub fn additional_fields(&self) -> Value {
        if self.additional_model_fields.is_empty() {
            Value::Null
        } else {
            Value::Object(self.additional_model_fields.clone())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_persona")]
    pub default_persona: String,

    /// Tool round-trips allowed per human turn before the loop stops
    #[serde(default = "default_max_round_trips")]
    pub max_round_trips: usize,
}

fn default_persona() -> String {
    "Personal Assistant".into()
}
fn default_max_round_trips() -> usize {
    25
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            default_persona: default_persona(),
            max_round_trips: default_max_round_trips(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// `file` (persistent JSONL) or `memory` (process lifetime only)
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    #[serde(default = "default_memory_path")]
    pub path: PathBuf,

    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// Local sentence-embedding model used for recall
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Where the embedding model is cached; fastembed's default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_cache_dir: Option<PathBuf>,
}

fn default_memory_backend() -> String {
    "file".into()
}
fn default_memory_path() -> PathBuf {
    AppConfig::config_dir().join("memory")
}
fn default_recall_limit() -> usize {
    3
}
fn default_embedding_model() -> String {
    "all-minilm-l6-v2".into()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: default_memory_path(),
            recall_limit: default_recall_limit(),
            embedding_model: default_embedding_model(),
            embedding_cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_python_bin")]
    pub python_bin: String,

    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    /// Allowed shell command names; empty means unrestricted
    #[serde(default)]
    pub shell_allowlist: Vec<String>,

    #[serde(default = "default_search_results")]
    pub search_max_results: usize,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_python_bin() -> String {
    "python3".into()
}
fn default_exec_timeout() -> u64 {
    30
}
fn default_search_results() -> usize {
    5
}
fn default_http_timeout() -> u64 {
    15
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            python_bin: default_python_bin(),
            exec_timeout_secs: default_exec_timeout(),
            shell_allowlist: Vec::new(),
            search_max_results: default_search_results(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.toolbox/config.toml).
    ///
    /// Environment overrides, highest priority first:
    /// - `TOOLBOX_API_KEY`, then `AWS_BEARER_TOKEN_BEDROCK` or `ANTHROPIC_API_KEY`
    ///   depending on the provider kind
    /// - `TOOLBOX_PROVIDER`, `TOOLBOX_MODEL`, `TOOLBOX_REGION`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(kind) = var("TOOLBOX_PROVIDER") {
            self.provider.kind = kind.parse()?;
        }
        if let Some(model) = var("TOOLBOX_MODEL") {
            self.provider.model_id = model;
        }
        if let Some(region) = var("TOOLBOX_REGION").or_else(|| var("AWS_REGION")) {
            self.provider.region = region;
        }
        if self.provider.api_key.is_none() {
            let provider_var = match self.provider.kind {
                ProviderKind::Bedrock => "AWS_BEARER_TOKEN_BEDROCK",
                ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            };
            self.provider.api_key = var("TOOLBOX_API_KEY").or_else(|| var(provider_var));
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".toolbox")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.inference.temperature) {
            return Err(ConfigError::ValidationError(
                "inference.temperature must be between 0.0 and 1.0".into(),
            ));
        }
        if let Some(top_p) = self.inference.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(ConfigError::ValidationError(
                    "inference.top_p must be between 0.0 and 1.0".into(),
                ));
            }
        }
        if self.agent.max_round_trips == 0 {
            return Err(ConfigError::ValidationError("agent.max_round_trips must be >= 1".into()));
        }
        if self.memory.recall_limit == 0 {
            return Err(ConfigError::ValidationError("memory.recall_limit must be >= 1".into()));
        }
        if !matches!(self.memory.backend.as_str(), "file" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "memory.backend must be 'file' or 'memory', got '{}'",
                self.memory.backend
            )));
        }
        if self.persona(&self.agent.default_persona).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "agent.default_persona '{}' is not defined",
                self.agent.default_persona
            )));
        }
        Ok(())
    }

    /// Built-in personas with user-defined ones merged in by name.
    pub fn personas(&self) -> Vec<Persona> {
        let mut personas = builtin_personas();
        for custom in &self.personas {
            match personas.iter_mut().find(|p| p.name.eq_ignore_ascii_case(&custom.name)) {
                Some(existing) => *existing = custom.clone(),
                None => personas.push(custom.clone()),
            }
        }
        personas
    }

    pub fn persona(&self, name: &str) -> Option<Persona> {
        find_persona(&self.personas(), name).cloned()
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
