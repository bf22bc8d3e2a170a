use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use common::storage::types::document::{Document, ParsingStatus};
use ingestion_pipeline::NewDocument;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDocument {
    pub tenant_id: String,
    pub title: String,
    pub content: String,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[allow(dead_code)]
    pub operator_id: Option<String>,
}

fn default_source_type() -> String {
    "upload".to_string()
}
fn default_mime_type() -> String {
    "text/plain".to_string()
}
fn default_lang() -> String {
    "auto".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsQuery {
    pub tenant_id: String,
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub size: usize,
}

fn default_page_size() -> usize {
    20
}

fn document_json(document: &Document) -> serde_json::Value {
    json!({
        "id": document.id,
        "title": document.title,
        "sourceType": document.source_type,
        "mimeType": document.mime_type,
        "language": document.language,
        "contentHash": document.content_hash,
        "parsingStatus": match &document.parsing_status {
            ParsingStatus::Pending => "PENDING".to_string(),
            ParsingStatus::Success => "SUCCESS".to_string(),
            ParsingStatus::Failed { message } => format!("FAILED: {message}"),
        },
        "chunkCount": document.chunk_count,
        "createdAt": document.created_at.to_rfc3339(),
    })
}

pub async fn upload_document(
    State(state): State<ApiState>,
    Json(input): Json<UploadDocument>,
) -> Result<impl IntoResponse, ApiError> {
    info!(tenant_id = %input.tenant_id, title = %input.title, "document upload received");

    let document = state
        .ingestion
        .ingest(NewDocument {
            tenant_id: input.tenant_id,
            title: input.title,
            content: input.content,
            source_type: input.source_type,
            mime_type: input.mime_type,
            language: input.lang,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": document_json(&document) })),
    ))
}

pub async fn list_documents(
    State(state): State<ApiState>,
    Query(query): Query<ListDocumentsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if query.size > 100 {
        return Err(ApiError::validation("size must be at most 100"));
    }

    let documents = Document::list_live(&query.tenant_id, query.page, query.size, &state.db).await?;
    let items: Vec<_> = documents.iter().map(document_json).collect();

    Ok(Json(json!({ "success": true, "data": items })))
}
