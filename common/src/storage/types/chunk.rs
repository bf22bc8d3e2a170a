use std::sync::Arc;

use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Chunk, "chunk", {
    document_id: String,
    tenant_id: String,
    chunk_number: u32,
    text: String,
    language: String,
    token_size: u32,
    vector_version: u32
});

impl Chunk {
    pub fn new(
        document_id: String,
        tenant_id: String,
        chunk_number: u32,
        text: String,
        language: String,
        token_size: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            tenant_id,
            chunk_number,
            text,
            language,
            token_size,
            vector_version: 1,
        }
    }

    /// Persists a whole document's chunks in one transaction so a partially
    /// written chunk sequence can never be observed.
    pub async fn store_batch(chunks: Vec<Chunk>, db: &SurrealDbClient) -> Result<(), AppError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let chunks = Arc::new(chunks);
        let response = db
            .client
            .query(
                "BEGIN TRANSACTION;
                 FOR $chunk IN $chunks {
                     CREATE type::thing('chunk', $chunk.id) CONTENT $chunk;
                 };
                 COMMIT TRANSACTION;",
            )
            .bind(("chunks", Arc::clone(&chunks)))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        Ok(db.get_item(id).await?)
    }

    /// Chunks of a document in their original order.
    pub async fn list_by_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE document_id = $document_id
                 ORDER BY chunk_number ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows)
    }

    pub async fn list_by_tenant(
        tenant_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM type::table($table) WHERE tenant_id = $tenant_id")
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows)
    }

    /// Bumps every chunk's vector version, obsoleting current embeddings.
    /// Returns the chunks with their new versions.
    pub async fn bump_vector_version(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "UPDATE type::table($table)
                 SET vector_version = vector_version + 1, updated_at = time::now()
                 WHERE document_id = $document_id
                 RETURN AFTER",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows)
    }

    pub async fn delete_by_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($table) WHERE document_id = $document_id")
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_owned()))
            .await?
            .check()?;
        Ok(())
    }
}
