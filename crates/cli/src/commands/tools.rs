//! `toolbox tools`: Print the tool configuration sent with each model call.

use anyhow::anyhow;
use toolbox_core::tool::ToolConfig;
use toolbox_tools::{ToolKind, resolve_tools};

use super::{load_config, select_persona};

pub fn run(persona: Option<String>) -> anyhow::Result<()> {
    let kinds = match persona {
        Some(name) => {
            let config = load_config()?;
            let persona = select_persona(&config, Some(&name))?;
            resolve_tools(&persona.tools).map_err(|e| anyhow!("persona '{}' is misconfigured: {e}", persona.name))?
        }
        None => ToolKind::ALL.to_vec(),
    };

    println!("{}", serde_json::to_string_pretty(&tool_config(&kinds))?);
    Ok(())
}

fn tool_config(kinds: &[ToolKind]) -> ToolConfig {
    ToolConfig::auto(kinds.iter().map(|k| k.descriptor()).collect())
}
