//! `toolbox config`: Configuration file helpers.

use anyhow::Context;
use toolbox_config::AppConfig;

use super::load_config;

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}

pub fn show() -> anyhow::Result<()> {
    let mut config = load_config()?;
    if config.provider.api_key.is_some() {
        config.provider.api_key = Some("***".into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn init() -> anyhow::Result<()> {
    let dir = AppConfig::config_dir();
    let path = dir.join("config.toml");
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    std::fs::write(&path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
