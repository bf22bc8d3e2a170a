use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chat_orchestrator::ChatOrchestrator;
use common::{storage::db::SurrealDbClient, utils::config::AppConfig};
use ingestion_pipeline::IngestionPipeline;
use retrieval_pipeline::RetrievalService;
use tool_gateway::ToolExecutor;

/// Shared state behind the v1 API routes.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub ingestion: Arc<IngestionPipeline>,
    pub retrieval: Arc<RetrievalService>,
    pub tools: Arc<ToolExecutor>,
    /// Operation ids already applied, for idempotent regeneration.
    pub seen_operations: Arc<Mutex<HashSet<String>>>,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        orchestrator: Arc<ChatOrchestrator>,
        ingestion: Arc<IngestionPipeline>,
        retrieval: Arc<RetrievalService>,
        tools: Arc<ToolExecutor>,
    ) -> Self {
        Self {
            db,
            config,
            orchestrator,
            ingestion,
            retrieval,
            tools,
            seen_operations: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Records an operation id, returning false when it was seen before.
    pub fn claim_operation(&self, operation_id: &str) -> bool {
        #[allow(clippy::expect_used)]
        self.seen_operations
            .lock()
            .expect("operation set poisoned")
            .insert(operation_id.to_owned())
    }
}
