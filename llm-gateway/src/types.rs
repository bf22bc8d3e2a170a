use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use common::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn of conversation history handed to a completion backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Outcome of an earlier tool execution, forwarded to the model in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub tool_code: String,
    pub content: String,
    pub is_error: bool,
}

/// Everything a completion backend needs for one request. The recognized
/// options are exactly these; providers see nothing else.
#[derive(Debug, Clone)]
pub struct CompletionContext {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub messages: Vec<PromptMessage>,
    pub knowledge_context: Vec<String>,
    pub tool_results: Vec<ToolResultRecord>,
}

impl CompletionContext {
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens: None,
            messages: Vec::new(),
            knowledge_context: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    /// Renders the retrieval and tool sections that precede the chat
    /// history in the provider prompt.
    pub fn context_preamble(&self) -> Option<String> {
        if self.knowledge_context.is_empty() && self.tool_results.is_empty() {
            return None;
        }

        let mut preamble = String::new();
        if !self.knowledge_context.is_empty() {
            preamble.push_str("Context information:\n==================\n");
            for (i, snippet) in self.knowledge_context.iter().enumerate() {
                preamble.push_str(&format!("[{i}] {snippet}\n"));
            }
        }
        if !self.tool_results.is_empty() {
            preamble.push_str("Tool results:\n==================\n");
            for record in &self.tool_results {
                let marker = if record.is_error { "error" } else { "ok" };
                preamble.push_str(&format!(
                    "{} ({marker}): {}\n",
                    record.tool_code, record.content
                ));
            }
        }
        Some(preamble)
    }
}

/// A tool invocation the model asked for in its reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub tool_code: String,
    pub arguments_json: String,
}

/// Result of a completion call.
#[derive(Debug, Clone, Default)]
pub struct CompletionOutcome {
    pub content: String,
    pub tool_call: Option<ToolCallRequest>,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub latency_ms: u64,
    pub cost: f64,
    /// True when the router had to substitute a fallback provider's
    /// default model.
    pub substituted: bool,
}

/// Push-based sink for streamed completions. Implementations receive
/// chunks in provider order; after `on_complete` or `on_error` no further
/// `on_chunk` will be delivered.
#[async_trait]
pub trait ChunkSink: Send {
    async fn on_chunk(&mut self, delta: &str);
    async fn on_complete(&mut self, outcome: &CompletionOutcome);
    async fn on_error(&mut self, error: &AppError);
}

/// Sink that records every event, for tests and buffering callers.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub chunks: Vec<String>,
    pub completed: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
impl ChunkSink for CollectingSink {
    async fn on_chunk(&mut self, delta: &str) {
        assert!(
            self.completed.is_none() && self.error.is_none(),
            "chunk delivered after terminal event"
        );
        self.chunks.push(delta.to_owned());
    }

    async fn on_complete(&mut self, outcome: &CompletionOutcome) {
        self.completed = Some(outcome.content.clone());
    }

    async fn on_error(&mut self, error: &AppError) {
        self.error = Some(error.to_string());
    }
}
