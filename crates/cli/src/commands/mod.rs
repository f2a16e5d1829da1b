//! Subcommand implementations and the wiring they share.

pub mod chat;
pub mod config_cmd;
pub mod memory;
pub mod personas;
pub mod tools;

use std::sync::Arc;

use anyhow::{Context, anyhow};
use toolbox_config::AppConfig;
use toolbox_core::memory::MemoryStore;
use toolbox_core::persona::Persona;
use toolbox_core::provider::ModelProvider;
use toolbox_core::tool::ToolExecutor;
use toolbox_memory::{FastEmbedder, FileStore, InMemoryStore};
use toolbox_tools::{Consultant, ToolSettings, Toolbox};

pub fn load_config() -> anyhow::Result<AppConfig> {
    AppConfig::load().context("Failed to load config")
}

/// The named persona, or the configured default.
pub fn select_persona(config: &AppConfig, name: Option<&str>) -> anyhow::Result<Persona> {
    let name = name.unwrap_or(&config.agent.default_persona);
    config.persona(name).ok_or_else(|| {
        let known: Vec<String> = config.personas().into_iter().map(|p| p.name).collect();
        anyhow!("unknown persona '{name}' (available: {})", known.join(", "))
    })
}

pub async fn open_memory(config: &AppConfig) -> anyhow::Result<Arc<dyn MemoryStore>> {
    let embedder = FastEmbedder::load(&config.memory.embedding_model, config.memory.embedding_cache_dir.clone())
        .await
        .with_context(|| format!("Failed to load embedding model '{}'", config.memory.embedding_model))?;
    let embedder = Arc::new(embedder);

    Ok(match config.memory.backend.as_str() {
        "memory" => Arc::new(InMemoryStore::new(embedder)),
        _ => Arc::new(
            FileStore::open(config.memory.path.clone(), embedder)
                .await
                .with_context(|| format!("Failed to open memory at {}", config.memory.path.display()))?,
        ),
    })
}

/// The persona's tool executor. A persona naming a tool that does not exist
/// is reported as a configuration error.
pub fn build_tools(
    config: &AppConfig,
    persona: &Persona,
    memory: Arc<dyn MemoryStore>,
    provider: Arc<dyn ModelProvider>,
) -> anyhow::Result<Arc<dyn ToolExecutor>> {
    let toolbox = Toolbox::for_persona(persona, memory, ToolSettings::from_config(config))
        .map_err(|e| anyhow!("persona '{}' is misconfigured: {e}", persona.name))?
        .with_consultant(Consultant::new(
            provider,
            config.provider.model_id.clone(),
            config.inference.to_inference_config(),
        ));
    Ok(Arc::new(toolbox))
}
