//! `toolbox memory`: Memory management commands.

use toolbox_core::memory::MemoryRecord;

use super::{load_config, open_memory};

fn snippet(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        out.push_str("...");
    }
    out
}

fn print_record(record: &MemoryRecord) {
    println!(
        "  {}  [{}] {}",
        record.id,
        record.updated_at.format("%Y-%m-%d %H:%M"),
        snippet(&record.text, 80)
    );
    if !record.metadata.is_empty() {
        println!("      metadata: {}", serde_json::Value::Object(record.metadata.clone()));
    }
}

pub async fn list() -> anyhow::Result<()> {
    let config = load_config()?;
    let store = open_memory(&config).await?;

    let records = store.list().await?;
    if records.is_empty() {
        println!("No memories saved yet.");
        return Ok(());
    }
    println!("{} memories ({} backend)", records.len(), store.name());
    for record in &records {
        print_record(record);
    }
    Ok(())
}

pub async fn save(text: &str) -> anyhow::Result<()> {
    let config = load_config()?;
    let store = open_memory(&config).await?;

    let id = store.save(text, None).await?;
    println!("Memory saved: {id}");
    Ok(())
}

pub async fn recall(query: &str, k: Option<usize>) -> anyhow::Result<()> {
    let config = load_config()?;
    let store = open_memory(&config).await?;

    let hits = store.recall(query, k.unwrap_or(config.memory.recall_limit)).await?;
    if hits.is_empty() {
        println!("No relevant memories found.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("  {:>2}. [score: {:.2}] {}  ({})", i + 1, hit.score, snippet(&hit.text, 80), hit.id);
    }
    Ok(())
}

pub async fn delete(id: &str) -> anyhow::Result<()> {
    let config = load_config()?;
    let store = open_memory(&config).await?;

    store.delete(id).await?;
    println!("Memory {id} deleted.");
    Ok(())
}

pub async fn profile(set: Option<String>) -> anyhow::Result<()> {
    let config = load_config()?;
    let store = open_memory(&config).await?;

    if let Some(text) = set {
        store.set_profile(&text).await?;
        println!("User profile updated.");
        return Ok(());
    }
    match store.get_profile().await? {
        Some(profile) => println!("{profile}"),
        None => println!("No user profile found."),
    }
    Ok(())
}
