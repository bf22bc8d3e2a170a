mod bootstrap;

use api_router::api_routes_v1;
use axum::Router;
use bootstrap::{build_services, init_tracing};
use common::utils::config::get_config;
use ingestion_pipeline::run_worker_loop;
use tracing::{error, info};

/// Combined deployment: API server plus the embedding worker in one
/// process.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = get_config()?;
    let services = build_services(config).await?;

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&services.api_state))
        .with_state(services.api_state.clone());

    let worker_db = services.db;
    let worker_pipeline = services.ingestion;
    tokio::spawn(async move {
        info!("Starting embedding worker");
        if let Err(e) = run_worker_loop(worker_db, worker_pipeline).await {
            error!("Worker process error: {e}");
        }
    });

    info!("Starting server listening on 0.0.0.0:{}", services.config.http_port);
    let serve_address = format!("0.0.0.0:{}", services.config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_router::api_state::ApiState;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use chat_orchestrator::{ChatOrchestrator, NoopFlowRunner, ThreadStore};
    use common::{
        runtime::Runtime,
        storage::{db::SurrealDbClient, indexes::ensure_runtime_indexes},
        utils::config::{AppConfig, BalancingStrategy},
    };
    use ingestion_pipeline::IngestionPipeline;
    use llm_gateway::{
        hashed::HashedBackend, scripted::ScriptedBackend, ProviderEntry, ProviderRouter,
    };
    use retrieval_pipeline::RetrievalService;
    use std::sync::Arc;
    use tool_gateway::ToolExecutor;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn build_test_app() -> Router {
        let config = AppConfig::for_tests();
        let database = format!("test_db_{}", Uuid::new_v4());
        let db = Arc::new(
            SurrealDbClient::memory("main_ns", &database)
                .await
                .expect("failed to start in-memory surrealdb"),
        );
        db.ensure_schema().await.expect("schema");
        ensure_runtime_indexes(&db, 64).await.expect("indexes");

        let router = Arc::new(ProviderRouter::new(
            vec![ProviderEntry {
                name: "primary".to_string(),
                prefixes: vec!["gpt-".to_string(), "embed-".to_string()],
                models: vec!["gpt-x".to_string(), "embed-small".to_string()],
                default_model: "gpt-x".to_string(),
                weight: 1,
                enabled: true,
                chat: Arc::new(ScriptedBackend::replying("ok")),
                embedding: Arc::new(HashedBackend::new(64)),
            }],
            true,
            BalancingStrategy::RoundRobin,
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

        let api_state = ApiState::new(db, config, orchestrator, ingestion, retrieval, tools);
        Router::new()
            .nest("/api/v1", api_routes_v1(&api_state))
            .with_state(api_state)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn smoke_startup_with_in_memory_surrealdb() {
        let app = build_test_app().await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/live")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);

        let ready_response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/ready")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("ready response");
        assert_eq!(ready_response.status(), StatusCode::OK);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn smoke_upload_flows_through_the_full_stack() {
        let app = build_test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/kb/documents")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "tenantId": "1",
                            "title": "Smoke",
                            "content": "smoke test content for the full stack",
                        })
                        .to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("upload response");
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
