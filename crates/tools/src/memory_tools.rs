//! Memory and profile tools, backed by a shared [`MemoryStore`].

use serde_json::{Value, json};
use toolbox_core::error::{MemoryError, ToolError};
use toolbox_core::memory::MemoryStore;

use crate::registry::{IdInput, ProfileInput, RecallInput, SaveMemoryInput, UpdateMemoryInput};

pub const NO_MEMORIES: &str = "No relevant memories found.";
pub const NO_PROFILE: &str = "No user profile found.";

fn store_error(tool: &str, e: MemoryError) -> ToolError {
    ToolError::failed(tool, e)
}

pub async fn save(store: &dyn MemoryStore, input: SaveMemoryInput) -> Result<Value, ToolError> {
    if input.text.trim().is_empty() {
        return Err(ToolError::invalid("save_memory", "memory text is empty"));
    }
    let id = store
        .save(&input.text, input.metadata)
        .await
        .map_err(|e| store_error("save_memory", e))?;
    let preview: String = input.text.chars().take(50).collect();
    Ok(json!({
        "message": format!("Memory saved: {preview}..."),
        "id": id,
    }))
}

pub async fn recall(store: &dyn MemoryStore, input: RecallInput, default_k: usize) -> Result<Value, ToolError> {
    let k = input.k.unwrap_or(default_k).max(1);
    let hits = store
        .recall(&input.query, k)
        .await
        .map_err(|e| store_error("recall_memories", e))?;
    if hits.is_empty() {
        return Ok(Value::String(NO_MEMORIES.into()));
    }
    serde_json::to_value(hits).map_err(|e| ToolError::failed("recall_memories", e))
}

pub async fn update(store: &dyn MemoryStore, input: UpdateMemoryInput) -> Result<Value, ToolError> {
    store
        .update(&input.id, &input.text, input.metadata)
        .await
        .map_err(|e| store_error("update_memory", e))?;
    Ok(Value::String(format!("Memory {} updated.", input.id)))
}

pub async fn delete(store: &dyn MemoryStore, input: IdInput) -> Result<Value, ToolError> {
    store
        .delete(&input.id)
        .await
        .map_err(|e| store_error("delete_memory", e))?;
    Ok(Value::String(format!("Memory {} deleted.", input.id)))
}

pub async fn list(store: &dyn MemoryStore) -> Result<Value, ToolError> {
    let records = store.list().await.map_err(|e| store_error("list_all_memories", e))?;
    if records.is_empty() {
        return Ok(Value::String("No memories saved yet.".into()));
    }
    let items: Vec<Value> = records
        .into_iter()
        .map(|r| {
            json!({
                "id": r.id,
                "text": r.text,
                "metadata": r.metadata,
                "updated_at": r.updated_at.to_rfc3339(),
            })
        })
        .collect();
    Ok(Value::Array(items))
}

pub async fn get_profile(store: &dyn MemoryStore) -> Result<Value, ToolError> {
    let profile = store
        .get_profile()
        .await
        .map_err(|e| store_error("get_user_profile", e))?;
    Ok(Value::String(profile.unwrap_or_else(|| NO_PROFILE.into())))
}

pub async fn set_profile(store: &dyn MemoryStore, input: ProfileInput) -> Result<Value, ToolError> {
    store
        .set_profile(&input.profile)
        .await
        .map_err(|e| store_error("update_user_profile", e))?;
    Ok(Value::String("User profile updated.".into()))
}
