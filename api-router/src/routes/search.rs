use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use common::storage::types::chunk_embedding::Confidence;
use retrieval_pipeline::{Hit, RetrievalMode, RetrievalOptions};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub tenant_id: String,
    pub query: String,
    pub model_code: Option<String>,
    pub top_k: Option<usize>,
    pub threshold: Option<f32>,
    pub vector_weight: Option<f32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub document_ids: Vec<String>,
}

fn hit_json(hit: &Hit) -> serde_json::Value {
    json!({
        "chunkId": hit.chunk.id,
        "documentId": hit.chunk.document_id,
        "chunkNumber": hit.chunk.chunk_number,
        "score": hit.score,
        "confidence": match hit.confidence {
            Confidence::High => "HIGH",
            Confidence::Medium => "MEDIUM",
            Confidence::Low => "LOW",
        },
        "highlights": hit.highlights,
    })
}

async fn run_search(
    state: &ApiState,
    request: SearchRequest,
    mode: RetrievalMode,
) -> Result<Vec<Hit>, ApiError> {
    let top_k = request.top_k.unwrap_or(10);
    let threshold = request
        .threshold
        .unwrap_or(state.config.knowledge.similarity_threshold);

    state
        .orchestrator
        .admission()
        .validate_search(top_k, threshold, request.vector_weight)?;

    let mut options = RetrievalOptions::new(
        request
            .model_code
            .unwrap_or_else(|| state.config.knowledge.default_embedding_model.clone()),
    );
    options.top_k = top_k;
    options.threshold = threshold;
    options.tag_filter = request.tags;
    options.document_filter = request.document_ids;
    if let Some(weight) = request.vector_weight {
        options.vector_weight = weight;
    }

    let hits = state
        .retrieval
        .retrieve(&request.tenant_id, &request.query, mode, &options)
        .await?;
    Ok(hits)
}

pub async fn vector_search(
    State(state): State<ApiState>,
    Json(request): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let hits = run_search(&state, request, RetrievalMode::Vector).await?;
    let items: Vec<_> = hits.iter().map(hit_json).collect();
    Ok(Json(json!({ "success": true, "data": items })))
}

pub async fn hybrid_search(
    State(state): State<ApiState>,
    Json(request): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let hits = run_search(&state, request, RetrievalMode::Hybrid).await?;
    let items: Vec<_> = hits.iter().map(hit_json).collect();
    Ok(Json(json!({ "success": true, "data": items })))
}
