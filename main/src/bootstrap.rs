use std::sync::Arc;

use api_router::api_state::ApiState;
use chat_orchestrator::{ChatOrchestrator, NoopFlowRunner, ThreadStore};
use common::{
    runtime::Runtime,
    storage::{db::SurrealDbClient, indexes::ensure_runtime_indexes},
    utils::config::AppConfig,
};
use ingestion_pipeline::IngestionPipeline;
use llm_gateway::ProviderRouter;
use retrieval_pipeline::RetrievalService;
use tool_gateway::ToolExecutor;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Everything the binaries wire together once at startup.
pub struct Services {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub ingestion: Arc<IngestionPipeline>,
    pub api_state: ApiState,
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// Connects the database, defines schema and indexes, builds the provider
/// router and the component stack on top of it.
pub async fn build_services(config: AppConfig) -> Result<Services, Box<dyn std::error::Error>> {
    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    db.ensure_schema().await?;
    ensure_runtime_indexes(&db, config.knowledge.embedding_dimension).await?;

    if config.llm.providers.is_empty() {
        warn!("no LLM providers configured; completion and embedding calls will fail");
    }
    let router = Arc::new(ProviderRouter::from_config(
        &config.llm,
        config.knowledge.embedding_dimension,
    ));

    let runtime = Arc::new(Runtime::with_defaults());

    let ingestion = Arc::new(IngestionPipeline::new(
        Arc::clone(&db),
        Arc::clone(&router),
        Arc::clone(&runtime),
        config.clone(),
    ));
    let retrieval = Arc::new(RetrievalService::new(Arc::clone(&db), Arc::clone(&router)));
    let tools = Arc::new(ToolExecutor::new(
        Arc::clone(&db),
        Arc::clone(&runtime.tools),
        config.tools.clone(),
    ));
    let orchestrator = Arc::new(ChatOrchestrator::new(
        ThreadStore::new(Arc::clone(&db)),
        Arc::clone(&router),
        Arc::clone(&retrieval),
        Arc::clone(&tools),
        Arc::new(NoopFlowRunner),
        runtime,
        config.clone(),
    ));

    let api_state = ApiState::new(
        Arc::clone(&db),
        config.clone(),
        orchestrator,
        Arc::clone(&ingestion),
        retrieval,
        tools,
    );

    info!(
        embedding_model = %config.knowledge.default_embedding_model,
        embedding_dimension = config.knowledge.embedding_dimension,
        providers = config.llm.providers.len(),
        "services initialized"
    );

    Ok(Services {
        db,
        config,
        ingestion,
        api_state,
    })
}
