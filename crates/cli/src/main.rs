//! Toolbox CLI: the main entry point.
//!
//! Commands:
//! - `chat`      Interactive chat or single-message mode
//! - `personas`  List the available personas
//! - `tools`     Print the tool configuration sent to the model
//! - `memory`    Inspect and edit long-term memory
//! - `config`    Show or initialise the configuration file

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "toolbox",
    about = "Toolbox — a streaming tool-use chat agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Persona to start with (defaults to agent.default_persona)
        #[arg(short, long)]
        persona: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Attach a file to the first message
        #[arg(short, long)]
        attach: Option<PathBuf>,
    },

    /// List the available personas
    Personas,

    /// Print the tool configuration for a persona (all tools by default)
    Tools {
        #[arg(short, long)]
        persona: Option<String>,
    },

    /// Manage long-term memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Configuration file helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// List every saved memory
    List,
    /// Save a memory
    Save { text: String },
    /// Recall the memories closest to a query
    Recall {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Delete a memory by id
    Delete { id: String },
    /// Show the user profile, or replace it with --set
    Profile {
        #[arg(long)]
        set: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the config file location
    Path,
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with the streamed answer.
    let filter = if cli.verbose { "debug" } else { "info" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Chat {
            persona,
            message,
            attach,
        } => commands::chat::run(persona, message, attach).await?,
        Commands::Personas => commands::personas::run()?,
        Commands::Tools { persona } => commands::tools::run(persona)?,
        Commands::Memory { action } => match action {
            MemoryAction::List => commands::memory::list().await?,
            MemoryAction::Save { text } => commands::memory::save(&text).await?,
            MemoryAction::Recall { query, k } => commands::memory::recall(&query, k).await?,
            MemoryAction::Delete { id } => commands::memory::delete(&id).await?,
            MemoryAction::Profile { set } => commands::memory::profile(set).await?,
        },
        Commands::Config { action } => match action {
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Init => commands::config_cmd::init()?,
        },
    }

    Ok(())
}
