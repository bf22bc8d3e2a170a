#![allow(clippy::missing_docs_in_private_items)]

use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    documents::{list_documents, upload_document},
    liveness::live,
    readiness::ready,
    search::{hybrid_search, vector_search},
    threads::{create_thread, delete_thread, list_threads, regenerate_message, send_message},
    tools::execute_tool,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1.
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let knowledge = Router::new()
        .route(
            "/kb/documents",
            post(upload_document)
                .get(list_documents)
                .layer(DefaultBodyLimit::max(
                    app_state.config.knowledge.max_document_bytes.saturating_add(4096),
                )),
        )
        .route("/kb/search/vector", post(vector_search))
        .route("/kb/search/hybrid", post(hybrid_search));

    let chat = Router::new()
        .route("/chat/threads", post(create_thread).get(list_threads))
        .route("/chat/threads/{id}", axum::routing::delete(delete_thread))
        .route("/chat/threads/{id}/messages", post(send_message))
        .route("/chat/threads/{id}/regenerate", post(regenerate_message));

    let tools = Router::new().route("/mcp/tools/{code}/execute", post(execute_tool));

    probes.merge(knowledge).merge(chat).merge(tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use chat_orchestrator::{ChatOrchestrator, NoopFlowRunner, ThreadStore};
    use common::{
        params::{ParamKind, ParamSpec},
        runtime::{FairPool, PoolSpec, Runtime},
        storage::{
            db::SurrealDbClient,
            indexes::ensure_runtime_indexes,
            types::{
                chat_message::{ChatMessage, MessageRole},
                tool_definition::{ToolDefinition, ToolKind},
                tool_grant::ToolGrant,
                usage_record::UsageRecord,
            },
        },
        utils::config::{AppConfig, BalancingStrategy},
    };
    use ingestion_pipeline::IngestionPipeline;
    use llm_gateway::{
        hashed::HashedBackend, scripted::ScriptedBackend, ProviderEntry, ProviderRouter,
    };
    use retrieval_pipeline::RetrievalService;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tool_gateway::ToolExecutor;
    use tower::ServiceExt;
    use uuid::Uuid;

    const DIMENSION: usize = 64;

    async fn build_test_app(config: AppConfig) -> (Router, Arc<SurrealDbClient>) {
        let database = format!("test_db_{}", Uuid::new_v4());
        let db = Arc::new(
            SurrealDbClient::memory("api_ns", &database)
                .await
                .expect("failed to start in-memory surrealdb"),
        );
        db.ensure_schema().await.expect("schema");
        ensure_runtime_indexes(&db, DIMENSION)
            .await
            .expect("runtime indexes");

        let backend = Arc::new(ScriptedBackend::replying("Alpha ships next quarter."));
        let router = Arc::new(ProviderRouter::new(
            vec![ProviderEntry {
                name: "primary".to_string(),
                prefixes: vec!["gpt-".to_string(), "embed-".to_string()],
                models: vec!["gpt-x".to_string(), "embed-small".to_string()],
                default_model: "gpt-x".to_string(),
                weight: 1,
                enabled: true,
                chat: backend,
                embedding: Arc::new(HashedBackend::new(DIMENSION)),
            }],
            false,
            BalancingStrategy::RoundRobin,
        ));

        let runtime = Arc::new(Runtime::new(
            PoolSpec {
                workers: 4,
                queue: 100,
            },
            4,
            4,
        ));
        let ingestion = Arc::new(IngestionPipeline::new(
            Arc::clone(&db),
            Arc::clone(&router),
            Arc::clone(&runtime),
            config.clone(),
        ));
        let retrieval = Arc::new(RetrievalService::new(Arc::clone(&db), Arc::clone(&router)));
        let tools = Arc::new(ToolExecutor::new(
            Arc::clone(&db),
            Arc::new(FairPool::new(4)),
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

        let state = ApiState::new(
            Arc::clone(&db),
            config,
            orchestrator,
            ingestion,
            retrieval,
            tools,
        );
        let app = Router::new()
            .nest("/api/v1", api_routes_v1(&state))
            .with_state(state);
        (app, db)
    }

    async fn post_json(app: &Router, uri: &str, body: Value) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response")
    }

    async fn get_uri(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response")
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    async fn upload(app: &Router, tenant: &str, title: &str, content: &str) -> Response {
        post_json(
            app,
            "/api/v1/kb/documents",
            json!({
                "tenantId": tenant,
                "title": title,
                "content": content,
            }),
        )
        .await
    }

    #[tokio::test]
    async fn probes_answer() {
        let (app, _db) = build_test_app(AppConfig::for_tests()).await;

        assert_eq!(get_uri(&app, "/api/v1/live").await.status(), StatusCode::OK);
        assert_eq!(get_uri(&app, "/api/v1/ready").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn scenario_ingest_then_vector_search() {
        let (app, _db) = build_test_app(AppConfig::for_tests()).await;

        let response = upload(&app, "1", "Alpha", "hello world hello").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["parsingStatus"], json!("SUCCESS"));
        assert_eq!(body["data"]["chunkCount"], json!(1));

        let search = post_json(
            &app,
            "/api/v1/kb/search/vector",
            json!({
                "tenantId": "1",
                "query": "hello",
                "topK": 5,
                "threshold": 0.3,
            }),
        )
        .await;
        assert_eq!(search.status(), StatusCode::OK);
        let body = body_json(search).await;
        let hits = body["data"].as_array().expect("hit array");
        assert_eq!(hits.len(), 1);
        assert!(hits[0]["score"].as_f64().expect("score") >= 0.6);
    }

    #[tokio::test]
    async fn scenario_duplicate_upload_conflicts() {
        let (app, _db) = build_test_app(AppConfig::for_tests()).await;

        let first = upload(&app, "1", "Alpha", "hello world hello").await;
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = upload(&app, "1", "Alpha", "hello world hello").await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let body = body_json(second).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"]["code"], json!("DUPLICATE_DOCUMENT_CONTENT"));
        assert!(body["error"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn scenario_cross_tenant_search_is_empty() {
        let (app, _db) = build_test_app(AppConfig::for_tests()).await;

        upload(&app, "1", "Alpha", "hello world hello").await;

        for threshold in [0.3, 0.0] {
            let search = post_json(
                &app,
                "/api/v1/kb/search/vector",
                json!({
                    "tenantId": "2",
                    "query": "hello",
                    "topK": 5,
                    "threshold": threshold,
                }),
            )
            .await;
            assert_eq!(search.status(), StatusCode::OK);
            let body = body_json(search).await;
            assert!(
                body["data"].as_array().expect("array").is_empty(),
                "tenant 2 must not see tenant 1 chunks at threshold {threshold}"
            );
        }
    }

    #[tokio::test]
    async fn scenario_chat_happy_path() {
        let (app, db) = build_test_app(AppConfig::for_tests()).await;

        upload(&app, "1", "Alpha", "alpha launch details and alpha milestones").await;

        let created = post_json(
            &app,
            "/api/v1/chat/threads",
            json!({
                "tenantId": "1",
                "userId": "42",
                "defaultModel": "gpt-x",
            }),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let thread_id = body_json(created).await["data"]["id"]
            .as_str()
            .expect("thread id")
            .to_owned();

        let sent = post_json(
            &app,
            &format!("/api/v1/chat/threads/{thread_id}/messages"),
            json!({
                "tenantId": "1",
                "userId": "42",
                "content": "summarize alpha",
                "enableKnowledgeRetrieval": true,
            }),
        )
        .await;
        assert_eq!(sent.status(), StatusCode::OK);
        let body = body_json(sent).await;
        assert_eq!(body["data"]["message"]["content"], json!("Alpha ships next quarter."));

        // (a) one USER and one ASSISTANT message persisted.
        let messages = ChatMessage::list_by_thread(&thread_id, &db)
            .await
            .expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);

        // (b) at least one citation into tenant 1.
        let citations = body["data"]["citations"].as_array().expect("citations");
        assert!(!citations.is_empty());

        // (c) one usage record with tokens flowing.
        let day = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let usage = UsageRecord::for_tenant_day("1", &day, &db).await.expect("usage");
        assert_eq!(usage.len(), 1);
        assert!(usage[0].tokens_in + usage[0].tokens_out > 0);
    }

    #[tokio::test]
    async fn scenario_rate_limit_rejects_fourth_message() {
        let mut config = AppConfig::for_tests();
        config.chat.rate_limit_max_messages = 3;
        config.chat.rate_limit_window_secs = 10;
        let (app, db) = build_test_app(config).await;

        let created = post_json(
            &app,
            "/api/v1/chat/threads",
            json!({ "tenantId": "1", "userId": "42", "defaultModel": "gpt-x" }),
        )
        .await;
        let thread_id = body_json(created).await["data"]["id"]
            .as_str()
            .expect("thread id")
            .to_owned();

        for i in 0..3 {
            let sent = post_json(
                &app,
                &format!("/api/v1/chat/threads/{thread_id}/messages"),
                json!({ "tenantId": "1", "userId": "42", "content": format!("message {i}") }),
            )
            .await;
            assert_eq!(sent.status(), StatusCode::OK);
        }

        let fourth = post_json(
            &app,
            &format!("/api/v1/chat/threads/{thread_id}/messages"),
            json!({ "tenantId": "1", "userId": "42", "content": "message 3" }),
        )
        .await;
        assert_eq!(fourth.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            fourth
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("10")
        );
        let body = body_json(fourth).await;
        assert_eq!(body["error"]["code"], json!("RATE_LIMITED"));

        // The rejected message was not persisted.
        let messages = ChatMessage::list_by_thread(&thread_id, &db)
            .await
            .expect("messages");
        let user_count = messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .count();
        assert_eq!(user_count, 3);
    }

    #[tokio::test]
    async fn scenario_hybrid_weight_flips_the_ranking() {
        let (app, _db) = build_test_app(AppConfig::for_tests()).await;

        // One chunk repeats the query terms (BM25 favourite), the other is
        // the query verbatim (cosine favourite).
        let lexical = upload(
            &app,
            "1",
            "Repeats",
            "quarterly forecast quarterly forecast quarterly",
        )
        .await;
        let lexical_doc = body_json(lexical).await["data"]["id"]
            .as_str()
            .expect("doc id")
            .to_owned();
        let semantic = upload(&app, "1", "Verbatim", "quarterly forecast").await;
        let semantic_doc = body_json(semantic).await["data"]["id"]
            .as_str()
            .expect("doc id")
            .to_owned();

        let search = |weight: f64| {
            let app = app.clone();
            async move {
                let response = post_json(
                    &app,
                    "/api/v1/kb/search/hybrid",
                    json!({
                        "tenantId": "1",
                        "query": "quarterly forecast",
                        "topK": 5,
                        "threshold": 0.0,
                        "vectorWeight": weight,
                    }),
                )
                .await;
                assert_eq!(response.status(), StatusCode::OK);
                body_json(response).await["data"]
                    .as_array()
                    .expect("hits")
                    .clone()
            }
        };

        let semantic_first = search(1.0).await;
        assert_eq!(semantic_first.len(), 2, "both chunks are returned");
        assert_eq!(semantic_first[0]["documentId"], json!(semantic_doc));

        let lexical_first = search(0.0).await;
        assert_eq!(lexical_first.len(), 2, "both chunks are returned");
        assert_eq!(lexical_first[0]["documentId"], json!(lexical_doc));
    }

    #[tokio::test]
    async fn search_validates_threshold_and_weight() {
        let (app, _db) = build_test_app(AppConfig::for_tests()).await;

        let bad_threshold = post_json(
            &app,
            "/api/v1/kb/search/vector",
            json!({ "tenantId": "1", "query": "x", "threshold": 1.5 }),
        )
        .await;
        assert_eq!(bad_threshold.status(), StatusCode::BAD_REQUEST);

        let bad_weight = post_json(
            &app,
            "/api/v1/kb/search/hybrid",
            json!({ "tenantId": "1", "query": "x", "vectorWeight": -0.2 }),
        )
        .await;
        assert_eq!(bad_weight.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_thread_is_a_404() {
        let (app, _db) = build_test_app(AppConfig::for_tests()).await;

        let sent = post_json(
            &app,
            "/api/v1/chat/threads/nope/messages",
            json!({ "tenantId": "1", "userId": "42", "content": "hello" }),
        )
        .await;
        assert_eq!(sent.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn streaming_turn_emits_sse_events() {
        let (app, db) = build_test_app(AppConfig::for_tests()).await;

        let created = post_json(
            &app,
            "/api/v1/chat/threads",
            json!({ "tenantId": "1", "userId": "42", "defaultModel": "gpt-x" }),
        )
        .await;
        let thread_id = body_json(created).await["data"]["id"]
            .as_str()
            .expect("thread id")
            .to_owned();

        let response = post_json(
            &app,
            &format!("/api/v1/chat/threads/{thread_id}/messages"),
            json!({
                "tenantId": "1",
                "userId": "42",
                "content": "stream please",
                "streamMode": true,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream")));

        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("stream body");
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("event: start"));
        assert!(text.contains("event: step"));
        assert!(text.contains("event: chunk"));
        assert!(text.contains("event: complete"));

        let complete_at = text.find("event: complete").expect("complete event");
        assert!(
            !text[complete_at..].contains("event: chunk"),
            "no chunk after the terminal event"
        );

        let messages = ChatMessage::list_by_thread(&thread_id, &db)
            .await
            .expect("messages");
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn regenerate_requires_and_deduplicates_operation_ids() {
        let (app, db) = build_test_app(AppConfig::for_tests()).await;

        let created = post_json(
            &app,
            "/api/v1/chat/threads",
            json!({ "tenantId": "1", "userId": "42", "defaultModel": "gpt-x" }),
        )
        .await;
        let thread_id = body_json(created).await["data"]["id"]
            .as_str()
            .expect("thread id")
            .to_owned();

        post_json(
            &app,
            &format!("/api/v1/chat/threads/{thread_id}/messages"),
            json!({ "tenantId": "1", "userId": "42", "content": "hello" }),
        )
        .await;

        let user_message_id = ChatMessage::list_by_thread(&thread_id, &db)
            .await
            .expect("messages")
            .into_iter()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.id)
            .expect("user message");

        let regenerate_body = json!({
            "tenantId": "1",
            "userId": "42",
            "userMessageId": user_message_id,
        });

        // Without the idempotency header the request is rejected.
        let missing_header = post_json(
            &app,
            &format!("/api/v1/chat/threads/{thread_id}/regenerate"),
            regenerate_body.clone(),
        )
        .await;
        assert_eq!(missing_header.status(), StatusCode::BAD_REQUEST);

        let with_header = |operation: &'static str| {
            let app = app.clone();
            let body = regenerate_body.clone();
            let uri = format!("/api/v1/chat/threads/{thread_id}/regenerate");
            async move {
                app.oneshot(
                    Request::builder()
                        .method("POST")
                        .uri(uri)
                        .header(header::CONTENT_TYPE, "application/json")
                        .header("x-operation-id", operation)
                        .body(Body::from(body.to_string()))
                        .expect("request"),
                )
                .await
                .expect("response")
            }
        };

        let first = with_header("op-1").await;
        assert_eq!(first.status(), StatusCode::OK);

        let replay = with_header("op-1").await;
        assert_eq!(replay.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn tool_execution_over_http() {
        let (app, db) = build_test_app(AppConfig::for_tests()).await;

        db.store_item(ToolDefinition::new(
            "echo".to_string(),
            "Echo".to_string(),
            "Echoes parameters".to_string(),
            ToolKind::LocalScript {
                command: "cat".to_string(),
            },
            vec![ParamSpec::required("message", ParamKind::String)],
            5,
        ))
        .await
        .expect("definition");
        db.store_item(ToolGrant::new("1".to_string(), "echo".to_string(), 1))
            .await
            .expect("grant");

        // No grant for this tenant: 403.
        let forbidden = post_json(
            &app,
            "/api/v1/mcp/tools/echo/execute",
            json!({ "tenantId": "2", "userId": "7", "params": { "message": "hi" } }),
        )
        .await;
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let ok = post_json(
            &app,
            "/api/v1/mcp/tools/echo/execute",
            json!({ "tenantId": "1", "userId": "7", "params": { "message": "ping" } }),
        )
        .await;
        assert_eq!(ok.status(), StatusCode::OK);
        let body = body_json(ok).await;
        assert!(body["data"]["content"]
            .as_str()
            .expect("content")
            .contains("ping"));

        // Quota of one is now exhausted: 429.
        let exhausted = post_json(
            &app,
            "/api/v1/mcp/tools/echo/execute",
            json!({ "tenantId": "1", "userId": "7", "params": { "message": "again" } }),
        )
        .await;
        assert_eq!(exhausted.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(exhausted).await;
        assert_eq!(body["error"]["code"], json!("QUOTA_EXCEEDED"));
    }
}
