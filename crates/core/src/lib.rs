//! # Toolbox Core
//!
//! Domain types, traits, and error definitions for the Toolbox tool-use
//! chat agent. This crate has **zero framework dependencies**. It defines the
//! domain model that all other crates implement against.
//!
//! Every collaborator of the conversation loop (model provider, tool
//! executor, memory store) is a trait here. Implementations live in their
//! respective crates, so tests can swap in scripted stand-ins.

pub mod display;
pub mod error;
pub mod memory;
pub mod message;
pub mod persona;
pub mod provider;
pub mod tool;
pub mod usage;

// Re-export key types at crate root for ergonomics
pub use display::{DisplayAttachment, DisplayEntry, DisplayLog, format_tool_result};
pub use error::{MemoryError, ProviderError, ToolError};
pub use memory::{Embedder, MemoryHit, MemoryRecord, MemoryStore};
pub use message::{Attachment, ContentBlock, History, Message, Role, ToolUseBlock, UserInput};
pub use persona::{Persona, builtin_personas, find_persona};
pub use provider::{
    ConverseRequest, EventStream, InferenceConfig, ModelProvider, StopReason, StreamEvent, SystemPrompt,
};
pub use tool::{ToolConfig, ToolDescriptor, ToolExecutor};
pub use usage::{ModelPricing, TokenUsage, estimate_cost};
