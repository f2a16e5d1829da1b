//! `toolbox personas`: List the available personas.

use super::load_config;

pub fn run() -> anyhow::Result<()> {
    let config = load_config()?;

    println!("Personas");
    println!("========");
    for persona in config.personas() {
        let marker = if persona.name.eq_ignore_ascii_case(&config.agent.default_persona) {
            " (default)"
        } else {
            ""
        };
        println!();
        println!("  {}{marker}", persona.name);
        println!("    {}", persona.description);
        println!("    tools: {}", persona.tools.join(", "));
    }

    Ok(())
}
