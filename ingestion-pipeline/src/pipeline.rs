use std::{sync::Arc, time::Instant};

use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{error, info, warn};

use common::{
    error::AppError,
    runtime::Runtime,
    storage::{
        db::SurrealDbClient,
        indexes::rebuild_indexes,
        types::{
            chunk::Chunk,
            chunk_embedding::ChunkEmbedding,
            document::{Document, ParsingStatus},
            embedding_job::{EmbeddingJob, EmbeddingJobStatus, MAX_ATTEMPTS},
        },
    },
    utils::{
        config::AppConfig,
        text::{clean_text, content_hash, resolve_language},
    },
};
use llm_gateway::ProviderRouter;

use crate::chunker::{chunk_token_size, split_into_chunks};

/// Upload command coming in from the API surface.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub tenant_id: String,
    pub title: String,
    pub content: String,
    pub source_type: String,
    pub mime_type: String,
    /// `auto` runs detection; anything else is taken verbatim.
    pub language: String,
}

pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    router: Arc<ProviderRouter>,
    runtime: Arc<Runtime>,
    config: AppConfig,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        router: Arc<ProviderRouter>,
        runtime: Arc<Runtime>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            router,
            runtime,
            config,
        }
    }

    /// Ingests one document: dedup, chunk, persist, then embed either
    /// synchronously (small documents) or through a background job.
    pub async fn ingest(&self, input: NewDocument) -> Result<Document, AppError> {
        let started = Instant::now();

        if input.content.len() > self.config.knowledge.max_document_bytes {
            return Err(AppError::Validation(format!(
                "document exceeds {} bytes",
                self.config.knowledge.max_document_bytes
            )));
        }

        let cleaned = clean_text(&input.content);
        if cleaned.is_empty() {
            return Err(AppError::Validation("document text is empty".to_string()));
        }

        let hash = content_hash(&cleaned);
        if Document::find_live_by_hash(&input.tenant_id, &hash, &self.db)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict("duplicate document content".to_string()));
        }
        if Document::find_live_by_title(&input.tenant_id, &input.title, &self.db)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict("duplicate document title".to_string()));
        }

        let language = resolve_language(&input.language, &cleaned);
        let document = Document::new(
            input.tenant_id.clone(),
            input.title,
            input.source_type,
            input.mime_type,
            language.clone(),
            hash,
        );
        self.db.store_item(document.clone()).await?;

        let chunks = match self.build_chunks(&document, &cleaned, &language) {
            Ok(chunks) => chunks,
            Err(err) => {
                Document::update_parsing_status(
                    &document.id,
                    ParsingStatus::Failed {
                        message: err.to_string(),
                    },
                    &self.db,
                )
                .await?;
                return Err(err);
            }
        };
        let chunk_count = chunks.len();

        if let Err(err) = Chunk::store_batch(chunks.clone(), &self.db).await {
            Document::update_parsing_status(
                &document.id,
                ParsingStatus::Failed {
                    message: err.to_string(),
                },
                &self.db,
            )
            .await?;
            return Err(err);
        }

        Document::set_chunk_count(&document.id, chunk_count as u32, &self.db).await?;
        Document::update_parsing_status(&document.id, ParsingStatus::Success, &self.db).await?;

        // New chunk rows must become visible to lexical search.
        rebuild_indexes(&self.db).await?;

        let model = self.config.knowledge.default_embedding_model.clone();
        let synchronous = chunk_count <= self.config.knowledge.sync_chunk_limit
            && cleaned.chars().count() <= self.config.knowledge.sync_content_limit;

        if synchronous {
            let failed_batches = self.embed_chunks(&chunks, &model).await;
            if failed_batches > 0 {
                warn!(
                    document_id = %document.id,
                    failed_batches,
                    "some embedding batches failed during synchronous ingestion"
                );
            }
        } else {
            EmbeddingJob::create_and_store(
                document.id.clone(),
                input.tenant_id,
                model,
                &self.db,
            )
            .await?;
            info!(document_id = %document.id, "scheduled background embedding job");
        }

        info!(
            document_id = %document.id,
            chunks = chunk_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            synchronous,
            "document ingested"
        );

        Document::get_live(&document.id, &document.tenant_id, &self.db)
            .await?
            .ok_or_else(|| AppError::InternalError("ingested document vanished".to_string()))
    }

    fn build_chunks(
        &self,
        document: &Document,
        cleaned: &str,
        language: &str,
    ) -> Result<Vec<Chunk>, AppError> {
        let fragments = split_into_chunks(cleaned, &self.config.knowledge)?;
        Ok(fragments
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let token_size = chunk_token_size(&text);
                Chunk::new(
                    document.id.clone(),
                    document.tenant_id.clone(),
                    i as u32,
                    text,
                    language.to_string(),
                    token_size,
                )
            })
            .collect())
    }

    /// Embeds chunks in batches. Each batch is retried with exponential
    /// backoff; a batch that still fails is recorded and later batches
    /// continue. Returns the number of failed batches.
    pub async fn embed_chunks(&self, chunks: &[Chunk], model: &str) -> usize {
        let batch_size = self.config.knowledge.embedding_batch_size.max(1);
        let mut failed_batches = 0;

        for batch in chunks.chunks(batch_size) {
            let retry_strategy = ExponentialBackoff::from_millis(1000).map(jitter).take(3);

            // Batches run on the bounded ingestion pool; saturation pushes
            // back on the producer rather than dropping work.
            let result = Retry::spawn(retry_strategy, || {
                self.runtime.ingestion.run(self.embed_batch(batch, model))
            })
            .await;

            if let Err(err) = result {
                failed_batches += 1;
                error!(
                    model,
                    first_chunk = %batch.first().map(|c| c.id.as_str()).unwrap_or_default(),
                    error = %err,
                    "embedding batch failed after retries; continuing with later batches"
                );
            }
        }

        failed_batches
    }

    async fn embed_batch(&self, batch: &[Chunk], model: &str) -> Result<(), AppError> {
        for chunk in batch {
            let vector = self.router.embed(&chunk.text, model).await?;
            ChunkEmbedding::upsert(
                ChunkEmbedding::new(
                    chunk.id.clone(),
                    chunk.document_id.clone(),
                    chunk.tenant_id.clone(),
                    model.to_string(),
                    chunk.vector_version,
                    vector,
                ),
                &self.db,
            )
            .await?;
        }
        Ok(())
    }

    /// Bumps every chunk's vector version and re-embeds, obsoleting the
    /// prior vectors. Search serves the new rows as soon as they land.
    pub async fn re_embed_document(&self, document_id: &str, model: &str) -> Result<(), AppError> {
        let bumped = Chunk::bump_vector_version(document_id, &self.db).await?;
        if bumped.is_empty() {
            return Err(AppError::NotFound(format!(
                "document {document_id} has no chunks"
            )));
        }

        let failed = self.embed_chunks(&bumped, model).await;
        if failed > 0 {
            return Err(AppError::InternalError(format!(
                "{failed} embedding batches failed during re-embedding"
            )));
        }
        Ok(())
    }

    /// Runs one claimed background job to completion. A job whose
    /// attempts are exhausted is marked failed, otherwise it stays
    /// claimable.
    pub async fn process_job(&self, job: EmbeddingJob) -> Result<(), AppError> {
        let attempts = match job.status {
            EmbeddingJobStatus::InProgress { attempts, .. } => attempts,
            _ => 1,
        };

        let chunks = Chunk::list_by_document(&job.document_id, &self.db).await?;
        let failed = self.embed_chunks(&chunks, &job.model_code).await;

        if failed == 0 {
            EmbeddingJob::update_status(&job.id, EmbeddingJobStatus::Completed, &self.db).await?;
            return Ok(());
        }

        if attempts >= MAX_ATTEMPTS {
            EmbeddingJob::update_status(
                &job.id,
                EmbeddingJobStatus::Error(format!(
                    "max attempts reached with {failed} failed batches"
                )),
                &self.db,
            )
            .await?;
        }
        Err(AppError::InternalError(format!(
            "embedding job {} had {failed} failed batches",
            job.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::config::BalancingStrategy;
    use llm_gateway::{hashed::HashedBackend, scripted::ScriptedBackend, ProviderEntry};
    use uuid::Uuid;

    const DIMENSION: usize = 64;

    fn hashed_router() -> Arc<ProviderRouter> {
        Arc::new(ProviderRouter::new(
            vec![ProviderEntry {
                name: "embedded".to_string(),
                prefixes: vec!["embed-".to_string(), "gpt-".to_string()],
                models: vec!["embed-small".to_string(), "gpt-x".to_string()],
                default_model: "gpt-x".to_string(),
                weight: 1,
                enabled: true,
                chat: Arc::new(ScriptedBackend::replying("ok")),
                embedding: Arc::new(HashedBackend::new(DIMENSION)),
            }],
            true,
            BalancingStrategy::RoundRobin,
        ))
    }

    async fn pipeline_with(config: AppConfig) -> (IngestionPipeline, Arc<SurrealDbClient>) {
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("ingest_ns", &database)
                .await
                .expect("in-memory db"),
        );
        db.ensure_schema().await.expect("schema");
        common::storage::indexes::ensure_runtime_indexes(&db, DIMENSION)
            .await
            .expect("runtime indexes");

        let runtime = Arc::new(Runtime::new(
            common::runtime::PoolSpec {
                workers: 4,
                queue: 100,
            },
            4,
            4,
        ));
        let pipeline = IngestionPipeline::new(Arc::clone(&db), hashed_router(), runtime, config);
        (pipeline, db)
    }

    fn upload(tenant: &str, title: &str, content: &str) -> NewDocument {
        NewDocument {
            tenant_id: tenant.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            source_type: "upload".to_string(),
            mime_type: "text/plain".to_string(),
            language: "auto".to_string(),
        }
    }

    #[tokio::test]
    async fn ingest_small_document_embeds_synchronously() {
        let (pipeline, db) = pipeline_with(AppConfig::for_tests()).await;

        let document = pipeline
            .ingest(upload("tenant-1", "Alpha", "hello world hello"))
            .await
            .expect("ingest");

        assert_eq!(document.parsing_status, ParsingStatus::Success);
        assert_eq!(document.chunk_count, 1);

        let chunks = Chunk::list_by_document(&document.id, &db).await.expect("chunks");
        assert_eq!(chunks.len(), 1);

        // Synchronous path: the embedding row exists already.
        let embedding = ChunkEmbedding::get_by_chunk_and_model(&chunks[0].id, "embed-small", &db)
            .await
            .expect("get")
            .expect("embedding stored");
        assert_eq!(embedding.vector_version, 1);
        assert_eq!(embedding.embedding.len(), DIMENSION);

        // Vector search finds it with a high score for a shared-token query.
        let hits = ChunkEmbedding::search(
            pipeline
                .router
                .embed("hello", "embed-small")
                .await
                .expect("query embed"),
            "embed-small",
            "tenant-1",
            5,
            0.3,
            &db,
        )
        .await
        .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, chunks[0].id);
        assert!(hits[0].score >= 0.6, "got {}", hits[0].score);
    }

    #[tokio::test]
    async fn ingest_rejects_duplicates() {
        let (pipeline, _db) = pipeline_with(AppConfig::for_tests()).await;

        pipeline
            .ingest(upload("tenant-1", "Alpha", "hello world hello"))
            .await
            .expect("first ingest");

        // Same content, regardless of title.
        let same_content = pipeline
            .ingest(upload("tenant-1", "Beta", "hello world hello"))
            .await;
        assert!(matches!(same_content, Err(AppError::Conflict(_))));

        // Same title, different content.
        let same_title = pipeline
            .ingest(upload("tenant-1", "Alpha", "different content entirely"))
            .await;
        assert!(matches!(same_title, Err(AppError::Conflict(_))));

        // Another tenant is unaffected.
        pipeline
            .ingest(upload("tenant-2", "Alpha", "hello world hello"))
            .await
            .expect("other tenant ingests fine");
    }

    #[tokio::test]
    async fn soft_deleted_document_frees_its_hash() {
        let (pipeline, db) = pipeline_with(AppConfig::for_tests()).await;

        let document = pipeline
            .ingest(upload("tenant-1", "Alpha", "hello world hello"))
            .await
            .expect("ingest");
        Document::soft_delete(&document.id, "tenant-1", &db)
            .await
            .expect("soft delete");

        pipeline
            .ingest(upload("tenant-1", "Alpha", "hello world hello"))
            .await
            .expect("re-ingest after tombstone");
    }

    #[tokio::test]
    async fn ingest_rejects_empty_content() {
        let (pipeline, _db) = pipeline_with(AppConfig::for_tests()).await;

        let result = pipeline.ingest(upload("tenant-1", "Empty", "   \t ")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn large_document_takes_async_path_and_worker_completes_it() {
        let mut config = AppConfig::for_tests();
        // Force the asynchronous path regardless of document size.
        config.knowledge.sync_chunk_limit = 0;
        let (pipeline, db) = pipeline_with(config).await;

        let document = pipeline
            .ingest(upload("tenant-1", "Big", "hello world hello"))
            .await
            .expect("ingest");
        assert_eq!(document.parsing_status, ParsingStatus::Success);

        let chunks = Chunk::list_by_document(&document.id, &db).await.expect("chunks");
        assert!(
            ChunkEmbedding::get_by_chunk_and_model(&chunks[0].id, "embed-small", &db)
                .await
                .expect("get")
                .is_none(),
            "async path defers embedding to the worker"
        );

        let job = EmbeddingJob::claim_next(&db)
            .await
            .expect("claim")
            .expect("job queued");
        pipeline.process_job(job.clone()).await.expect("process");

        assert!(
            ChunkEmbedding::get_by_chunk_and_model(&chunks[0].id, "embed-small", &db)
                .await
                .expect("get")
                .is_some()
        );

        let refreshed: EmbeddingJob = db.get_item(&job.id).await.expect("get job").expect("job");
        assert_eq!(refreshed.status, EmbeddingJobStatus::Completed);
    }

    #[tokio::test]
    async fn re_embedding_bumps_versions_and_search_returns_same_chunks() {
        let (pipeline, db) = pipeline_with(AppConfig::for_tests()).await;

        let document = pipeline
            .ingest(upload("tenant-1", "Alpha", "hello world hello"))
            .await
            .expect("ingest");
        let chunks = Chunk::list_by_document(&document.id, &db).await.expect("chunks");

        let before = ChunkEmbedding::search(
            pipeline.router.embed("hello", "embed-small").await.expect("embed"),
            "embed-small",
            "tenant-1",
            5,
            0.3,
            &db,
        )
        .await
        .expect("search");

        pipeline
            .re_embed_document(&document.id, "embed-small")
            .await
            .expect("re-embed");

        let embedding = ChunkEmbedding::get_by_chunk_and_model(&chunks[0].id, "embed-small", &db)
            .await
            .expect("get")
            .expect("row");
        assert_eq!(embedding.vector_version, 2);

        let after = ChunkEmbedding::search(
            pipeline.router.embed("hello", "embed-small").await.expect("embed"),
            "embed-small",
            "tenant-1",
            5,
            0.3,
            &db,
        )
        .await
        .expect("search");

        let chunk_ids_before: Vec<&str> = before.iter().map(|h| h.chunk_id.as_str()).collect();
        let chunk_ids_after: Vec<&str> = after.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(chunk_ids_before, chunk_ids_after);
        assert!((before[0].score - after[0].score).abs() < 1e-5);
    }
}
