use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use rand::Rng;
use tracing::{info, warn};

use common::{
    error::AppError,
    utils::config::{BalancingStrategy, LlmConfig},
};

use crate::{
    backend::{ChatBackend, EmbeddingBackend},
    openai::OpenAiBackend,
    types::{ChunkSink, CompletionContext, CompletionOutcome},
};

/// One registered provider: routing metadata plus its backends, indexed by
/// name in the router.
pub struct ProviderEntry {
    pub name: String,
    pub prefixes: Vec<String>,
    pub models: Vec<String>,
    pub default_model: String,
    pub weight: u32,
    pub enabled: bool,
    pub chat: Arc<dyn ChatBackend>,
    pub embedding: Arc<dyn EmbeddingBackend>,
}

impl ProviderEntry {
    fn matching_prefix_len(&self, model: &str) -> Option<usize> {
        self.prefixes
            .iter()
            .filter(|prefix| model.starts_with(prefix.as_str()))
            .map(String::len)
            .max()
    }

    pub fn serves_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model) || self.matching_prefix_len(model).is_some()
    }
}

/// Maps model names to providers by registered prefix and performs
/// failover and load balancing across healthy peers.
pub struct ProviderRouter {
    entries: Vec<Arc<ProviderEntry>>,
    failover_enabled: bool,
    balancing: BalancingStrategy,
    rr_cursor: AtomicUsize,
}

impl ProviderRouter {
    pub fn new(
        entries: Vec<ProviderEntry>,
        failover_enabled: bool,
        balancing: BalancingStrategy,
    ) -> Self {
        Self {
            entries: entries.into_iter().map(Arc::new).collect(),
            failover_enabled,
            balancing,
            rr_cursor: AtomicUsize::new(0),
        }
    }

    /// Builds the router from the `llm` configuration group, one
    /// OpenAI-compatible backend per provider entry.
    pub fn from_config(config: &LlmConfig, embedding_dimension: usize) -> Self {
        let entries = config
            .providers
            .iter()
            .filter(|provider| provider.enabled)
            .map(|provider| {
                let backend = Arc::new(OpenAiBackend::new(
                    &provider.api_key,
                    &provider.base_url,
                    embedding_dimension,
                ));
                info!(provider = %provider.name, models = ?provider.models, "registered provider");
                ProviderEntry {
                    name: provider.name.clone(),
                    prefixes: provider.prefixes.clone(),
                    models: provider.models.clone(),
                    default_model: provider.default_model.clone(),
                    weight: provider.weight,
                    enabled: provider.enabled,
                    chat: Arc::<OpenAiBackend>::clone(&backend),
                    embedding: backend,
                }
            })
            .collect();

        Self::new(entries, config.failover_enabled, config.balancing)
    }

    /// True when some enabled provider serves `model`; used to validate
    /// thread defaults.
    pub fn serves_model(&self, model: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.enabled && entry.serves_model(model))
    }

    /// Chooses the provider for `model` by longest registered prefix.
    pub fn route(&self, model: &str) -> Result<Arc<ProviderEntry>, AppError> {
        self.entries
            .iter()
            .filter(|entry| entry.enabled)
            .filter_map(|entry| {
                entry
                    .matching_prefix_len(model)
                    .or_else(|| entry.models.iter().any(|m| m == model).then_some(0))
                    .map(|len| (len, entry))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, entry)| Arc::clone(entry))
            .ok_or_else(|| AppError::ProviderUnavailable(format!("no provider serves {model}")))
    }

    /// Non-streaming completion with §7 semantics: one internal retry on a
    /// provider content error, failover to a healthy peer when enabled.
    pub async fn complete(&self, ctx: &CompletionContext) -> Result<CompletionOutcome, AppError> {
        let primary = self.route(&ctx.model)?;

        if primary.chat.is_healthy().await {
            match Self::complete_with_retry(&primary, ctx).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_failover_candidate() && self.failover_enabled => {
                    warn!(provider = %primary.name, error = %err, "primary failed; attempting failover");
                }
                Err(err) => return Err(err),
            }
        } else if !self.failover_enabled {
            return Err(AppError::ProviderUnavailable(format!(
                "provider {} is unhealthy",
                primary.name
            )));
        } else {
            warn!(provider = %primary.name, "primary unhealthy; attempting failover");
        }

        let peer = self
            .pick_healthy_peer(&primary)
            .await
            .ok_or_else(|| AppError::ProviderUnavailable("no healthy provider".into()))?;

        let (peer_ctx, substituted) = Self::substitute_model(ctx, &peer);
        let mut outcome = Self::complete_with_retry(&peer, &peer_ctx).await?;
        outcome.substituted |= substituted;
        Ok(outcome)
    }

    /// Streaming completion. Failover happens only before the stream
    /// starts; once chunks flow, a failure terminates with `on_error`.
    pub async fn stream(
        &self,
        ctx: &CompletionContext,
        sink: &mut dyn ChunkSink,
    ) -> Result<CompletionOutcome, AppError> {
        let primary = self.route(&ctx.model)?;

        if primary.chat.is_healthy().await {
            return primary.chat.stream(ctx, sink).await;
        }

        if !self.failover_enabled {
            let error = AppError::ProviderUnavailable(format!(
                "provider {} is unhealthy",
                primary.name
            ));
            sink.on_error(&error).await;
            return Err(error);
        }

        let Some(peer) = self.pick_healthy_peer(&primary).await else {
            let error = AppError::ProviderUnavailable("no healthy provider".into());
            sink.on_error(&error).await;
            return Err(error);
        };

        let (peer_ctx, substituted) = Self::substitute_model(ctx, &peer);
        let mut outcome = peer.chat.stream(&peer_ctx, sink).await?;
        outcome.substituted |= substituted;
        Ok(outcome)
    }

    /// Routes an embedding request and enforces the C1 guarantee: the
    /// returned vector has the declared dimension (backends normalize).
    pub async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, AppError> {
        let entry = self.route(model)?;
        let vector = entry.embedding.embed(text, model).await?;

        let declared = entry.embedding.dimension(model);
        if vector.len() != declared {
            return Err(AppError::ProviderError(format!(
                "embedding dimension {} does not match declared {declared}",
                vector.len()
            )));
        }
        Ok(vector)
    }

    pub fn embedding_dimension(&self, model: &str) -> Result<usize, AppError> {
        let entry = self.route(model)?;
        Ok(entry.embedding.dimension(model))
    }

    fn substitute_model(
        ctx: &CompletionContext,
        peer: &ProviderEntry,
    ) -> (CompletionContext, bool) {
        if peer.serves_model(&ctx.model) {
            (ctx.clone(), false)
        } else {
            let mut substituted = ctx.clone();
            substituted.model = peer.default_model.clone();
            info!(
                from = %ctx.model,
                to = %substituted.model,
                provider = %peer.name,
                "substituting fallback provider's default model"
            );
            (substituted, true)
        }
    }

    async fn complete_with_retry(
        entry: &ProviderEntry,
        ctx: &CompletionContext,
    ) -> Result<CompletionOutcome, AppError> {
        match entry.chat.complete(ctx).await {
            Err(AppError::ProviderError(msg)) => {
                warn!(provider = %entry.name, error = %msg, "provider content error; retrying once");
                entry.chat.complete(ctx).await
            }
            other => other,
        }
    }

    async fn pick_healthy_peer(&self, exclude: &ProviderEntry) -> Option<Arc<ProviderEntry>> {
        let mut candidates = Vec::new();
        for entry in &self.entries {
            if entry.name != exclude.name && entry.enabled && entry.chat.is_healthy().await {
                candidates.push(Arc::clone(entry));
            }
        }
        if candidates.is_empty() {
            return None;
        }

        let picked = match self.balancing {
            BalancingStrategy::RoundRobin => {
                let cursor = self.rr_cursor.fetch_add(1, Ordering::Relaxed);
                cursor % candidates.len()
            }
            BalancingStrategy::Random => rand::rng().random_range(0..candidates.len()),
            BalancingStrategy::Weighted => {
                let total: u64 = candidates.iter().map(|c| u64::from(c.weight.max(1))).sum();
                let mut roll = rand::rng().random_range(0..total);
                let mut index = 0;
                for (i, candidate) in candidates.iter().enumerate() {
                    let weight = u64::from(candidate.weight.max(1));
                    if roll < weight {
                        index = i;
                        break;
                    }
                    roll -= weight;
                }
                index
            }
        };

        candidates.get(picked).map(Arc::clone)
    }
}
