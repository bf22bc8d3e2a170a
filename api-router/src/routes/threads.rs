use std::convert::Infallible;

use async_stream::stream;
use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chat_orchestrator::{
    CreateThread, EventSink, Regenerate, SendMessage, StreamEvent, ToolInvocation, TurnResponse,
};
use common::{context::RequestContext, params::TypedParams, storage::types::chat_thread::ChatThread};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadRequest {
    pub tenant_id: String,
    pub user_id: String,
    #[serde(default = "default_title")]
    pub title: String,
    pub default_model: String,
    pub temperature: Option<f32>,
    pub flow_snapshot_id: Option<String>,
    pub system_prompt: Option<String>,
}

fn default_title() -> String {
    "New thread".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListThreadsQuery {
    pub tenant_id: String,
    pub user_id: String,
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub size: usize,
    pub search: Option<String>,
}

fn default_page_size() -> usize {
    20
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocationRequest {
    pub tool_code: String,
    #[serde(default)]
    pub params: TypedParams,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub tenant_id: String,
    pub user_id: String,
    pub content: String,
    pub enable_knowledge_retrieval: Option<bool>,
    pub enable_tool_calling: Option<bool>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream_mode: bool,
    #[serde(default)]
    pub tool_invocations: Vec<ToolInvocationRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateRequest {
    pub tenant_id: String,
    pub user_id: String,
    pub user_message_id: String,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

fn thread_json(thread: &ChatThread) -> serde_json::Value {
    json!({
        "id": thread.id,
        "title": thread.title,
        "defaultModel": thread.default_model,
        "temperature": thread.temperature,
        "flowSnapshotId": thread.flow_snapshot_id,
        "createdAt": thread.created_at.to_rfc3339(),
        "updatedAt": thread.updated_at.to_rfc3339(),
    })
}

fn turn_json(response: &TurnResponse) -> serde_json::Value {
    json!({
        "message": {
            "id": response.message.id,
            "role": "ASSISTANT",
            "content": response.message.content,
            "tokenIn": response.message.token_in,
            "tokenOut": response.message.token_out,
            "latencyMs": response.message.latency_ms,
            "createdAt": response.message.created_at.to_rfc3339(),
        },
        "citations": response
            .citations
            .iter()
            .map(|citation| json!({
                "chunkId": citation.chunk_id,
                "similarity": citation.similarity,
                "modelCode": citation.model_code,
            }))
            .collect::<Vec<_>>(),
        "warnings": response.warnings,
        "substituted": response.substituted,
    })
}

pub async fn create_thread(
    State(state): State<ApiState>,
    Json(request): Json<CreateThreadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = RequestContext::new(request.tenant_id, request.user_id);
    let thread = state
        .orchestrator
        .create_thread(
            &ctx,
            CreateThread {
                title: request.title,
                default_model: request.default_model,
                temperature: request.temperature,
                flow_snapshot_id: request.flow_snapshot_id,
                system_prompt: request.system_prompt,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": thread_json(&thread) })),
    ))
}

pub async fn list_threads(
    State(state): State<ApiState>,
    Query(query): Query<ListThreadsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let threads = state
        .orchestrator
        .store()
        .list_threads(
            &query.tenant_id,
            &query.user_id,
            query.page,
            query.size,
            query.search.as_deref(),
        )
        .await?;
    let items: Vec<_> = threads.iter().map(thread_json).collect();
    Ok(Json(json!({ "success": true, "data": items })))
}

pub async fn delete_thread(
    State(state): State<ApiState>,
    Path(thread_id): Path<String>,
    Query(query): Query<ListThreadsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = RequestContext::new(query.tenant_id, query.user_id);
    state.orchestrator.delete_thread(&ctx, &thread_id).await?;
    Ok(Json(json!({ "success": true, "data": null })))
}

/// Sends a message on a thread, either synchronously or as an SSE stream
/// depending on `streamMode`.
pub async fn send_message(
    State(state): State<ApiState>,
    Path(thread_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Response, ApiError> {
    let ctx = RequestContext::new(request.tenant_id.clone(), request.user_id.clone());
    let command = SendMessage {
        content: request.content,
        enable_knowledge_retrieval: request.enable_knowledge_retrieval,
        enable_tool_calling: request.enable_tool_calling,
        model: request.model,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        tool_invocations: request
            .tool_invocations
            .into_iter()
            .map(|invocation| ToolInvocation {
                tool_code: invocation.tool_code,
                params: invocation.params,
            })
            .collect(),
    };

    if request.stream_mode {
        return Ok(stream_response(state, ctx, thread_id, command).into_response());
    }

    let response = state
        .orchestrator
        .send_message(&ctx, &thread_id, command)
        .await?;
    Ok(Json(json!({ "success": true, "data": turn_json(&response) })).into_response())
}

/// Regenerates the assistant turn for a user message. Requires an
/// `X-Operation-Id` header so retried requests deduplicate here instead
/// of producing a second turn.
pub async fn regenerate_message(
    State(state): State<ApiState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<RegenerateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let operation_id = headers
        .get("x-operation-id")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::validation("X-Operation-Id header is required"))?;

    if !state.claim_operation(operation_id) {
        return Err(ApiError {
            status: StatusCode::CONFLICT,
            code: "DUPLICATE_OPERATION",
            message: format!("operation {operation_id} was already applied"),
            details: None,
            retry_after_secs: None,
        });
    }

    let ctx = RequestContext::new(request.tenant_id, request.user_id)
        .with_operation_id(operation_id);
    let response = state
        .orchestrator
        .regenerate(
            &ctx,
            &thread_id,
            Regenerate {
                user_message_id: request.user_message_id,
                model: request.model,
                temperature: request.temperature,
                max_tokens: request.max_tokens,
            },
        )
        .await?;

    Ok(Json(json!({ "success": true, "data": turn_json(&response) })))
}

/// Forwards orchestrator events into the SSE channel.
struct ChannelSink {
    tx: mpsc::Sender<StreamEvent>,
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&mut self, event: StreamEvent) {
        let _ = self.tx.send(event).await;
    }
}

/// Aborts the orchestrator task when the client goes away mid-stream; the
/// accepted user message stays, no assistant row is written.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn event_to_sse(event: &StreamEvent) -> Event {
    let name = match event {
        StreamEvent::Start { .. } => "start",
        StreamEvent::Step { .. } => "step",
        StreamEvent::Chunk { .. } => "chunk",
        StreamEvent::Complete { .. } => "complete",
        StreamEvent::Error { .. } => "error",
    };
    Event::default()
        .event(name)
        .data(serde_json::to_string(event).unwrap_or_default())
}

fn stream_response(
    state: ApiState,
    ctx: RequestContext,
    thread_id: String,
    command: SendMessage,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);

    let orchestrator = state.orchestrator;
    let handle = tokio::spawn(async move {
        let mut sink = ChannelSink { tx };
        if let Err(err) = orchestrator
            .stream_message(&ctx, &thread_id, command, &mut sink)
            .await
        {
            // Pre-stream failures (admission, missing thread) have not
            // produced an error event yet; surface one.
            let api_error = crate::error::ApiError::from(err);
            let _ = sink
                .tx
                .send(StreamEvent::Error {
                    message: api_error.message,
                })
                .await;
        }
    });

    let event_stream = stream! {
        let _abort_on_drop = AbortOnDrop(handle);
        while let Some(event) = rx.recv().await {
            let terminal = matches!(
                event,
                StreamEvent::Complete { .. } | StreamEvent::Error { .. }
            );
            yield Ok(event_to_sse(&event));
            if terminal {
                break;
            }
        }
    };

    Sse::new(event_stream).keep_alive(KeepAlive::default())
}
