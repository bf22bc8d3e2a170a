#![allow(clippy::missing_docs_in_private_items)]

pub mod highlight;
pub mod lexical;
pub mod query;
pub mod scoring;
pub mod vector;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::instrument;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chunk::Chunk,
            chunk_embedding::Confidence,
            chunk_tag::ChunkTag,
        },
    },
};
use llm_gateway::ProviderRouter;

use highlight::highlight_fragments;
use lexical::lexical_search;
use query::canonicalize_query;
use scoring::merge_weighted;
use vector::vector_search;

/// Retrieval modes sharing one contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    Vector,
    Lexical,
    Hybrid,
}

/// Tuning knobs for one retrieval call.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub threshold: f32,
    pub vector_weight: f32,
    pub model_code: String,
    /// Inclusive-OR tag filter: a chunk passes when any of its tags match.
    pub tag_filter: Vec<String>,
    /// Strict subset filter on owning documents.
    pub document_filter: Vec<String>,
    pub max_highlights: usize,
    pub highlight_len: usize,
}

impl RetrievalOptions {
    pub fn new(model_code: impl Into<String>) -> Self {
        Self {
            top_k: 10,
            threshold: 0.3,
            vector_weight: 0.7,
            model_code: model_code.into(),
            tag_filter: Vec::new(),
            document_filter: Vec::new(),
            max_highlights: 3,
            highlight_len: 200,
        }
    }
}

/// One retrieval hit: the chunk, its (mode-dependent) score, a coarse
/// confidence bucket and highlight fragments.
#[derive(Debug, Clone)]
pub struct Hit {
    pub chunk: Chunk,
    pub score: f32,
    pub confidence: Confidence,
    pub highlights: Vec<String>,
}

/// Retrieval over a tenant's knowledge base: vector, lexical or a
/// weighted hybrid of both.
pub struct RetrievalService {
    db: Arc<SurrealDbClient>,
    router: Arc<ProviderRouter>,
}

impl RetrievalService {
    pub fn new(db: Arc<SurrealDbClient>, router: Arc<ProviderRouter>) -> Self {
        Self { db, router }
    }

    #[instrument(skip_all, fields(tenant_id, ?mode))]
    pub async fn retrieve(
        &self,
        tenant_id: &str,
        query: &str,
        mode: RetrievalMode,
        options: &RetrievalOptions,
    ) -> Result<Vec<Hit>, AppError> {
        let allowed_chunks = self.resolve_tag_filter(tenant_id, options).await?;
        let document_filter = (!options.document_filter.is_empty())
            .then_some(options.document_filter.as_slice());

        let mut hits = match mode {
            RetrievalMode::Vector => {
                self.vector_hits(tenant_id, query, options, document_filter, allowed_chunks.as_ref())
                    .await?
            }
            RetrievalMode::Lexical => {
                self.lexical_hits(tenant_id, query, options, document_filter, allowed_chunks.as_ref())
                    .await?
            }
            RetrievalMode::Hybrid => {
                self.hybrid_hits(tenant_id, query, options, document_filter, allowed_chunks.as_ref())
                    .await?
            }
        };

        for hit in &mut hits {
            hit.highlights = highlight_fragments(
                &hit.chunk.text,
                query,
                options.max_highlights,
                options.highlight_len,
            );
        }
        Ok(hits)
    }

    async fn resolve_tag_filter(
        &self,
        tenant_id: &str,
        options: &RetrievalOptions,
    ) -> Result<Option<HashSet<String>>, AppError> {
        if options.tag_filter.is_empty() {
            return Ok(None);
        }
        let allowed =
            ChunkTag::chunk_ids_for_tag_names(tenant_id, &options.tag_filter, &self.db).await?;
        Ok(Some(allowed))
    }

    async fn vector_hits(
        &self,
        tenant_id: &str,
        query: &str,
        options: &RetrievalOptions,
        document_filter: Option<&[String]>,
        allowed_chunks: Option<&HashSet<String>>,
    ) -> Result<Vec<Hit>, AppError> {
        let canonical = canonicalize_query(query);
        let embedding = self.router.embed(&canonical, &options.model_code).await?;

        let matches = vector_search(
            embedding,
            &options.model_code,
            tenant_id,
            options.top_k,
            options.threshold,
            document_filter,
            allowed_chunks,
            &self.db,
        )
        .await?;

        Ok(matches
            .into_iter()
            .map(|m| Hit {
                chunk: m.chunk,
                score: m.score,
                confidence: m.confidence,
                highlights: Vec::new(),
            })
            .collect())
    }

    async fn lexical_hits(
        &self,
        tenant_id: &str,
        query: &str,
        options: &RetrievalOptions,
        document_filter: Option<&[String]>,
        allowed_chunks: Option<&HashSet<String>>,
    ) -> Result<Vec<Hit>, AppError> {
        let matches = lexical_search(
            tenant_id,
            query,
            options.top_k,
            document_filter,
            allowed_chunks,
            &self.db,
        )
        .await?;

        Ok(matches
            .into_iter()
            .map(|m| Hit {
                confidence: Confidence::from_score(m.score),
                chunk: m.chunk,
                score: m.score,
                highlights: Vec::new(),
            })
            .collect())
    }

    /// Runs both sides concurrently and fuses with
    /// `w · vector + (1 − w) · lexical`. Degenerate weights collapse to a
    /// single side so the weight laws hold exactly.
    async fn hybrid_hits(
        &self,
        tenant_id: &str,
        query: &str,
        options: &RetrievalOptions,
        document_filter: Option<&[String]>,
        allowed_chunks: Option<&HashSet<String>>,
    ) -> Result<Vec<Hit>, AppError> {
        let w = options.vector_weight;
        if w >= 1.0 {
            return self
                .vector_hits(tenant_id, query, options, document_filter, allowed_chunks)
                .await;
        }
        if w <= 0.0 {
            return self
                .lexical_hits(tenant_id, query, options, document_filter, allowed_chunks)
                .await;
        }

        let (vector_side, lexical_side) = tokio::join!(
            self.vector_hits(tenant_id, query, options, document_filter, allowed_chunks),
            self.lexical_hits(tenant_id, query, options, document_filter, allowed_chunks),
        );
        let vector_side = vector_side?;
        let lexical_side = lexical_side?;

        struct Fused {
            chunk: Chunk,
            vector: Option<f32>,
            lexical: Option<f32>,
        }

        let mut by_chunk: HashMap<String, Fused> = HashMap::new();
        for hit in vector_side {
            by_chunk.insert(
                hit.chunk.id.clone(),
                Fused {
                    chunk: hit.chunk,
                    vector: Some(hit.score),
                    lexical: None,
                },
            );
        }
        for hit in lexical_side {
            by_chunk
                .entry(hit.chunk.id.clone())
                .and_modify(|fused| fused.lexical = Some(hit.score))
                .or_insert(Fused {
                    chunk: hit.chunk,
                    vector: None,
                    lexical: Some(hit.score),
                });
        }

        let mut merged: Vec<Hit> = by_chunk
            .into_values()
            .map(|fused| {
                let score = merge_weighted(fused.vector, fused.lexical, w);
                Hit {
                    confidence: Confidence::from_score(fused.vector.unwrap_or(score)),
                    chunk: fused.chunk,
                    score,
                    highlights: Vec::new(),
                }
            })
            .collect();

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        merged.truncate(options.top_k);
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::indexes::{ensure_runtime_indexes, rebuild_indexes};
    use common::storage::types::chunk_embedding::ChunkEmbedding;
    use common::storage::types::tag::Tag;
    use common::utils::config::BalancingStrategy;
    use llm_gateway::{hashed::HashedBackend, scripted::ScriptedBackend, ProviderEntry};
    use uuid::Uuid;

    const DIMENSION: usize = 64;

    fn hashed_router() -> Arc<ProviderRouter> {
        Arc::new(ProviderRouter::new(
            vec![ProviderEntry {
                name: "embedded".to_string(),
                prefixes: vec!["embed-".to_string()],
                models: vec!["embed-small".to_string()],
                default_model: "embed-small".to_string(),
                weight: 1,
                enabled: true,
                chat: Arc::new(ScriptedBackend::replying("ok")),
                embedding: Arc::new(HashedBackend::new(DIMENSION)),
            }],
            true,
            BalancingStrategy::RoundRobin,
        ))
    }

    async fn service() -> (RetrievalService, Arc<SurrealDbClient>, Arc<ProviderRouter>) {
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("retrieval_ns", &database)
                .await
                .expect("in-memory db"),
        );
        db.ensure_schema().await.expect("schema");
        ensure_runtime_indexes(&db, DIMENSION).await.expect("indexes");

        let router = hashed_router();
        (
            RetrievalService::new(Arc::clone(&db), Arc::clone(&router)),
            db,
            router,
        )
    }

    async fn seed_chunk_with_vector(
        db: &SurrealDbClient,
        router: &ProviderRouter,
        chunk_id: &str,
        document_id: &str,
        text: &str,
        embed_as: &str,
    ) {
        let mut chunk = Chunk::new(
            document_id.to_string(),
            "tenant-1".to_string(),
            0,
            text.to_string(),
            "en".to_string(),
            8,
        );
        chunk.id = chunk_id.to_string();
        db.store_item(chunk).await.expect("store chunk");

        let vector = router.embed(embed_as, "embed-small").await.expect("embed");
        ChunkEmbedding::upsert(
            ChunkEmbedding::new(
                chunk_id.to_string(),
                document_id.to_string(),
                "tenant-1".to_string(),
                "embed-small".to_string(),
                1,
                vector,
            ),
            db,
        )
        .await
        .expect("store embedding");
    }

    /// Two chunks: `lexical-hit` repeats the query terms (BM25 favourite),
    /// `semantic-hit` carries the query's exact embedding but barely
    /// overlaps lexically.
    async fn seed_hybrid_corpus(db: &SurrealDbClient, router: &ProviderRouter) {
        seed_chunk_with_vector(
            db,
            router,
            "lexical-hit",
            "d1",
            "quarterly forecast quarterly forecast quarterly",
            "quarterly forecast quarterly forecast quarterly",
        )
        .await;
        seed_chunk_with_vector(
            db,
            router,
            "semantic-hit",
            "d1",
            "forecast of revenue and outlook",
            // Embedded as the query itself: a perfect semantic twin.
            "quarterly forecast",
        )
        .await;
        rebuild_indexes(db).await.expect("rebuild");
    }

    fn options() -> RetrievalOptions {
        let mut options = RetrievalOptions::new("embed-small");
        options.threshold = 0.0;
        options
    }

    #[tokio::test]
    async fn hybrid_weight_one_ranks_semantic_first() {
        let (service, db, router) = service().await;
        seed_hybrid_corpus(&db, &router).await;

        let mut opts = options();
        opts.vector_weight = 1.0;
        let hits = service
            .retrieve("tenant-1", "quarterly forecast", RetrievalMode::Hybrid, &opts)
            .await
            .expect("retrieve");

        assert_eq!(hits.len(), 2, "both chunks are returned");
        assert_eq!(hits[0].chunk.id, "semantic-hit");
        assert_eq!(hits[1].chunk.id, "lexical-hit");
    }

    #[tokio::test]
    async fn hybrid_weight_zero_ranks_lexical_first() {
        let (service, db, router) = service().await;
        seed_hybrid_corpus(&db, &router).await;

        let mut opts = options();
        opts.vector_weight = 0.0;
        let hits = service
            .retrieve("tenant-1", "quarterly forecast", RetrievalMode::Hybrid, &opts)
            .await
            .expect("retrieve");

        assert_eq!(hits.len(), 2, "both chunks are returned");
        assert_eq!(hits[0].chunk.id, "lexical-hit");
        assert_eq!(hits[1].chunk.id, "semantic-hit");
    }

    #[tokio::test]
    async fn hybrid_weight_laws_hold() {
        let (service, db, router) = service().await;
        seed_hybrid_corpus(&db, &router).await;

        let mut at_one = options();
        at_one.vector_weight = 1.0;
        let hybrid_one = service
            .retrieve("tenant-1", "quarterly forecast", RetrievalMode::Hybrid, &at_one)
            .await
            .expect("hybrid w=1");
        let vector_only = service
            .retrieve("tenant-1", "quarterly forecast", RetrievalMode::Vector, &at_one)
            .await
            .expect("vector");
        let ids = |hits: &[Hit]| hits.iter().map(|h| h.chunk.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&hybrid_one), ids(&vector_only));

        let mut at_zero = options();
        at_zero.vector_weight = 0.0;
        let hybrid_zero = service
            .retrieve("tenant-1", "quarterly forecast", RetrievalMode::Hybrid, &at_zero)
            .await
            .expect("hybrid w=0");
        let lexical_only = service
            .retrieve("tenant-1", "quarterly forecast", RetrievalMode::Lexical, &at_zero)
            .await
            .expect("lexical");
        assert_eq!(ids(&hybrid_zero), ids(&lexical_only));
    }

    #[tokio::test]
    async fn identical_searches_return_identical_lists() {
        let (service, db, router) = service().await;
        seed_hybrid_corpus(&db, &router).await;

        let opts = options();
        let first = service
            .retrieve("tenant-1", "quarterly forecast", RetrievalMode::Vector, &opts)
            .await
            .expect("first");
        let second = service
            .retrieve("tenant-1", "quarterly forecast", RetrievalMode::Vector, &opts)
            .await
            .expect("second");

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.chunk.id, b.chunk.id);
            assert!((a.score - b.score).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn tag_filter_restricts_all_modes() {
        let (service, db, router) = service().await;
        seed_hybrid_corpus(&db, &router).await;

        let tag = Tag::get_or_create("tenant-1", "finance", &db).await.expect("tag");
        db.store_item(ChunkTag::new(
            "semantic-hit".to_string(),
            tag.id,
            "tenant-1".to_string(),
        ))
        .await
        .expect("store chunk tag");

        let mut opts = options();
        opts.tag_filter = vec!["finance".to_string()];
        let hits = service
            .retrieve("tenant-1", "quarterly forecast", RetrievalMode::Hybrid, &opts)
            .await
            .expect("retrieve");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "semantic-hit");

        // Tags that resolve to nothing mean an empty result, not "no filter".
        opts.tag_filter = vec!["unknown".to_string()];
        let none = service
            .retrieve("tenant-1", "quarterly forecast", RetrievalMode::Hybrid, &opts)
            .await
            .expect("retrieve");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn hits_carry_highlights() {
        let (service, db, router) = service().await;
        seed_hybrid_corpus(&db, &router).await;

        let opts = options();
        let hits = service
            .retrieve("tenant-1", "quarterly forecast", RetrievalMode::Vector, &opts)
            .await
            .expect("retrieve");

        let lexical_hit = hits
            .iter()
            .find(|h| h.chunk.id == "lexical-hit")
            .expect("lexical hit present");
        assert!(!lexical_hit.highlights.is_empty());
        assert!(lexical_hit.highlights[0].contains("quarterly"));
    }

    #[tokio::test]
    async fn top_k_zero_returns_empty() {
        let (service, db, router) = service().await;
        seed_hybrid_corpus(&db, &router).await;

        let mut opts = options();
        opts.top_k = 0;
        let hits = service
            .retrieve("tenant-1", "quarterly forecast", RetrievalMode::Hybrid, &opts)
            .await
            .expect("retrieve");
        assert!(hits.is_empty());
    }
}
