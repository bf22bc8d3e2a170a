use async_trait::async_trait;

use common::error::AppError;

use crate::types::{ChunkSink, CompletionContext, CompletionOutcome};

/// Uniform interface over chat-completion providers.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, ctx: &CompletionContext) -> Result<CompletionOutcome, AppError>;

    /// Streams a completion into `sink`. Chunks arrive in provider order;
    /// the terminal event (`on_complete` or `on_error`) is delivered before
    /// this returns, and nothing follows it.
    async fn stream(
        &self,
        ctx: &CompletionContext,
        sink: &mut dyn ChunkSink,
    ) -> Result<CompletionOutcome, AppError>;

    /// Cheap liveness proxy used by the router for failover decisions.
    async fn is_healthy(&self) -> bool;
}

/// Uniform interface over embedding providers. Callers own the retry
/// policy; implementations make exactly one attempt.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, AppError>;

    async fn is_available(&self, model: &str) -> bool;

    /// Declared dimension for `model`; used for index creation and the
    /// returned-vector check.
    fn dimension(&self, model: &str) -> usize;
}

/// Scales a vector to unit L2 norm. Zero vectors are returned unchanged so
/// degenerate inputs can't produce NaNs.
pub fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}
