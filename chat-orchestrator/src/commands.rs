use serde::{Deserialize, Serialize};

use common::{
    params::TypedParams,
    storage::types::{chat_message::ChatMessage, citation::Citation},
};

/// Request to open a new conversation thread.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateThread {
    pub title: String,
    pub default_model: String,
    pub temperature: Option<f32>,
    pub flow_snapshot_id: Option<String>,
    pub system_prompt: Option<String>,
}

/// Partial update of a thread's settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateThread {
    pub title: Option<String>,
    pub default_model: Option<String>,
    pub temperature: Option<f32>,
}

/// One explicit tool invocation attached to a message.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolInvocation {
    pub tool_code: String,
    pub params: TypedParams,
}

/// One user message and its per-turn overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessage {
    pub content: String,
    /// Explicit strategy flags; absent means the text heuristics decide.
    pub enable_knowledge_retrieval: Option<bool>,
    pub enable_tool_calling: Option<bool>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tool_invocations: Vec<ToolInvocation>,
}

/// Re-run of an assistant turn for an existing user message.
#[derive(Debug, Clone, Deserialize)]
pub struct Regenerate {
    pub user_message_id: String,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Completed turn: the persisted assistant message, its citations, and
/// whatever went sideways along the way.
#[derive(Debug, Clone)]
pub struct TurnResponse {
    pub message: ChatMessage,
    pub citations: Vec<Citation>,
    pub warnings: Vec<String>,
    pub substituted: bool,
}

impl TurnResponse {
    pub fn summary(&self) -> TurnSummary {
        TurnSummary {
            message_id: self.message.id.clone(),
            citation_count: self.citations.len(),
            token_in: self.message.token_in,
            token_out: self.message.token_out,
            warnings: self.warnings.clone(),
            substituted: self.substituted,
        }
    }
}

/// Wire-friendly digest of a completed turn, sent as the `complete` event.
#[derive(Debug, Clone, Serialize)]
pub struct TurnSummary {
    pub message_id: String,
    pub citation_count: usize,
    pub token_in: u32,
    pub token_out: u32,
    pub warnings: Vec<String>,
    pub substituted: bool,
}
