//! # planact core
//!
//! Domain types, traits, and error definitions for the Plan → Act → Respond
//! engine. This crate has no runtime framework dependencies beyond
//! `tokio::sync`. It defines the model that the other crates implement
//! against.
//!
//! ## Design Philosophy
//!
//! The collaborators the engine does not own (language-model backends and
//! tool back ends) are traits here. Implementations live elsewhere, which
//! keeps the phases testable against scripted providers and in-memory tools.

pub mod error;
pub mod event;
pub mod message;
pub mod plan;
pub mod provider;
pub mod structured;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus, Phase};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use plan::{ActionRecord, Plan, PlanStep, ToolStrategy};
pub use provider::{
    FinishReason, Provider, ProviderRequest, ProviderResponse, ResponseFormat, StreamChunk,
    ToolDefinition, Usage,
};
pub use structured::parse_partial;
pub use tool::{ExecutionMode, Tool, ToolCall, ToolMetadata, ToolOutcome, ToolResult};
