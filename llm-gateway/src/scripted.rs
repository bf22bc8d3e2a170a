use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use common::{error::AppError, utils::text::estimate_tokens};

use crate::{
    backend::ChatBackend,
    types::{ChunkSink, CompletionContext, CompletionOutcome, ToolCallRequest},
};

/// Chat backend with canned replies, for tests. Reports the calls it
/// served and can be toggled unhealthy or made to fail.
pub struct ScriptedBackend {
    content: String,
    chunks: Vec<String>,
    tool_call: Option<ToolCallRequest>,
    healthy: AtomicBool,
    fail_completions: AtomicBool,
    fail_next: AtomicUsize,
    fail_stream_after: Option<usize>,
    pub calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn replying(content: impl Into<String>) -> Self {
        let content = content.into();
        let chunks = content
            .split_inclusive(' ')
            .map(str::to_owned)
            .collect::<Vec<_>>();
        Self {
            content,
            chunks,
            tool_call: None,
            healthy: AtomicBool::new(true),
            fail_completions: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            fail_stream_after: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_tool_call(mut self, tool_call: ToolCallRequest) -> Self {
        self.tool_call = Some(tool_call);
        self
    }

    /// Fails the stream after delivering `n` chunks.
    pub fn failing_stream_after(mut self, n: usize) -> Self {
        self.fail_stream_after = Some(n);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_completions.store(failing, Ordering::SeqCst);
    }

    /// Makes the next `n` completions fail with a retryable provider
    /// error, then recover.
    pub fn fail_next_completions(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn outcome_for(&self, ctx: &CompletionContext) -> CompletionOutcome {
        let tokens_in = ctx
            .messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum::<usize>()
            .max(1) as u32;
        CompletionOutcome {
            content: self.content.clone(),
            tool_call: self.tool_call.clone(),
            tokens_in,
            tokens_out: estimate_tokens(&self.content).max(1) as u32,
            latency_ms: 1,
            cost: 0.0,
            substituted: false,
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, ctx: &CompletionContext) -> Result<CompletionOutcome, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_completions.load(Ordering::SeqCst) {
            return Err(AppError::ProviderUnavailable("scripted failure".into()));
        }
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::ProviderError("scripted transient error".into()));
        }
        Ok(self.outcome_for(ctx))
    }

    async fn stream(
        &self,
        ctx: &CompletionContext,
        sink: &mut dyn ChunkSink,
    ) -> Result<CompletionOutcome, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_completions.load(Ordering::SeqCst) {
            let error = AppError::ProviderUnavailable("scripted failure".into());
            sink.on_error(&error).await;
            return Err(error);
        }

        for (i, chunk) in self.chunks.iter().enumerate() {
            if self.fail_stream_after.is_some_and(|limit| i >= limit) {
                let error = AppError::ProviderError("scripted mid-stream failure".into());
                sink.on_error(&error).await;
                return Err(error);
            }
            sink.on_chunk(chunk).await;
        }

        let outcome = self.outcome_for(ctx);
        sink.on_complete(&outcome).await;
        Ok(outcome)
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CollectingSink;

    #[tokio::test]
    async fn streams_chunks_then_completes() {
        let backend = ScriptedBackend::replying("hello streamed world");
        let ctx = CompletionContext::new("gpt-x", 0.7);
        let mut sink = CollectingSink::default();

        let outcome = backend.stream(&ctx, &mut sink).await.expect("stream");
        assert_eq!(sink.chunks.join(""), "hello streamed world");
        assert_eq!(sink.completed.as_deref(), Some("hello streamed world"));
        assert!(sink.error.is_none());
        assert_eq!(outcome.content, "hello streamed world");
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_with_error_event() {
        let backend = ScriptedBackend::replying("one two three four").failing_stream_after(2);
        let ctx = CompletionContext::new("gpt-x", 0.7);
        let mut sink = CollectingSink::default();

        let result = backend.stream(&ctx, &mut sink).await;
        assert!(result.is_err());
        assert_eq!(sink.chunks.len(), 2);
        assert!(sink.completed.is_none());
        assert!(sink.error.is_some());
    }
}
