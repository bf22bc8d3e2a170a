#![allow(clippy::missing_docs_in_private_items)]

pub mod backend;
pub mod hashed;
pub mod openai;
pub mod router;
#[cfg(any(test, feature = "test-utils"))]
pub mod scripted;
pub mod types;

pub use backend::{ChatBackend, EmbeddingBackend};
pub use router::{ProviderEntry, ProviderRouter};
pub use types::{
    ChunkSink, CompletionContext, CompletionOutcome, PromptMessage, PromptRole, ToolCallRequest,
    ToolResultRecord,
};
