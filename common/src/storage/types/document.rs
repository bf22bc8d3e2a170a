#![allow(clippy::module_name_repetitions)]
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::{chunk::Chunk, chunk_embedding::ChunkEmbedding, chunk_tag::ChunkTag};

/// Parsing lifecycle of an uploaded document. `Failed` is terminal until
/// the document is re-ingested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ParsingStatus {
    Pending,
    Success,
    Failed { message: String },
}

stored_object!(Document, "document", {
    tenant_id: String,
    title: String,
    source_type: String,
    mime_type: String,
    language: String,
    content_hash: String,
    parsing_status: ParsingStatus,
    chunk_count: u32,
    #[serde(serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime", default)]
    deleted_at: Option<DateTime<Utc>>
});

impl Document {
    pub fn new(
        tenant_id: String,
        title: String,
        source_type: String,
        mime_type: String,
        language: String,
        content_hash: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id,
            title,
            source_type,
            mime_type,
            language,
            content_hash,
            parsing_status: ParsingStatus::Pending,
            chunk_count: 0,
            deleted_at: None,
        }
    }

    /// Fetches a document visible to `tenant_id`. Soft-deleted and
    /// foreign-tenant documents read as absent.
    pub async fn get_live(
        id: &str,
        tenant_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let document: Option<Self> = db.get_item(id).await?;
        Ok(document
            .filter(|d| d.tenant_id == tenant_id)
            .filter(|d| d.deleted_at.is_none()))
    }

    pub async fn find_live_by_hash(
        tenant_id: &str,
        content_hash: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE tenant_id = $tenant_id
                   AND content_hash = $content_hash
                   AND (deleted_at = NONE OR deleted_at = NULL)
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("content_hash", content_hash.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    pub async fn find_live_by_title(
        tenant_id: &str,
        title: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE tenant_id = $tenant_id
                   AND title = $title
                   AND (deleted_at = NONE OR deleted_at = NULL)
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("title", title.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Lists live documents for a tenant, newest first.
    pub async fn list_live(
        tenant_id: &str,
        page: usize,
        size: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let offset = page.saturating_mul(size);
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE tenant_id = $tenant_id
                   AND (deleted_at = NONE OR deleted_at = NULL)
                 ORDER BY created_at DESC
                 LIMIT $limit START $offset",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("limit", size as i64))
            .bind(("offset", offset as i64))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows)
    }

    pub async fn update_parsing_status(
        id: &str,
        status: ParsingStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/parsing_status", status))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;
        Ok(())
    }

    pub async fn set_chunk_count(
        id: &str,
        chunk_count: u32,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/chunk_count", chunk_count))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;
        Ok(())
    }

    /// Soft delete: stamps the tombstone. All read paths treat the document
    /// as absent afterwards; chunks and embeddings are removed on hard
    /// delete.
    pub async fn soft_delete(
        id: &str,
        tenant_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let document = Self::get_live(id, tenant_id, db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Document {id} not found")))?;

        let _updated: Option<Self> = db
            .update((Self::table_name(), &document.id))
            .patch(PatchOp::replace(
                "/deleted_at",
                surrealdb::sql::Datetime::default(),
            ))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;
        Ok(())
    }

    /// Hard delete: removes the document row and cascades to its chunks,
    /// their embeddings and their tag relations.
    pub async fn hard_delete(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        ChunkEmbedding::delete_by_document(id, db).await?;
        ChunkTag::delete_by_document(id, db).await?;
        Chunk::delete_by_document(id, db).await?;
        let _deleted: Option<Self> = db.delete_item(id).await?;
        Ok(())
    }
}
