use std::collections::HashSet;

use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::{chunk::Chunk, tag::Tag};

stored_object!(ChunkTag, "chunk_tag", {
    chunk_id: String,
    tag_id: String,
    tenant_id: String
});

impl ChunkTag {
    pub fn new(chunk_id: String, tag_id: String, tenant_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            chunk_id,
            tag_id,
            tenant_id,
        }
    }

    /// Chunk ids carrying at least one of the named tags (inclusive-OR
    /// filter semantics).
    pub async fn chunk_ids_for_tag_names(
        tenant_id: &str,
        names: &[String],
        db: &SurrealDbClient,
    ) -> Result<HashSet<String>, AppError> {
        let tags = Tag::find_by_names(tenant_id, names, db).await?;
        if tags.is_empty() {
            return Ok(HashSet::new());
        }
        let tag_ids: Vec<String> = tags.into_iter().map(|t| t.id).collect();

        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE tenant_id = $tenant_id AND tag_id IN $tag_ids",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("tag_ids", tag_ids))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().map(|row| row.chunk_id).collect())
    }

    pub async fn list_by_chunk(
        chunk_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM type::table($table) WHERE chunk_id = $chunk_id")
            .bind(("table", Self::table_name()))
            .bind(("chunk_id", chunk_id.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows)
    }

    pub async fn delete_by_chunk(chunk_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($table) WHERE chunk_id = $chunk_id")
            .bind(("table", Self::table_name()))
            .bind(("chunk_id", chunk_id.to_owned()))
            .await?
            .check()?;
        Ok(())
    }

    /// Removes tag relations for every chunk of a document.
    pub async fn delete_by_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let chunks = Chunk::list_by_document(document_id, db).await?;
        if chunks.is_empty() {
            return Ok(());
        }
        let chunk_ids: Vec<String> = chunks.into_iter().map(|c| c.id).collect();

        db.client
            .query("DELETE type::table($table) WHERE chunk_id IN $chunk_ids")
            .bind(("table", Self::table_name()))
            .bind(("chunk_ids", chunk_ids))
            .await?
            .check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_schema().await.expect("schema");
        db
    }

    #[tokio::test]
    async fn test_tag_filter_is_inclusive_or() {
        let db = memory_db().await;

        let billing = Tag::get_or_create("tenant-1", "billing", &db)
            .await
            .expect("tag");
        let legal = Tag::get_or_create("tenant-1", "legal", &db)
            .await
            .expect("tag");

        db.store_item(ChunkTag::new(
            "chunk-a".into(),
            billing.id.clone(),
            "tenant-1".into(),
        ))
        .await
        .expect("store");
        db.store_item(ChunkTag::new(
            "chunk-b".into(),
            legal.id.clone(),
            "tenant-1".into(),
        ))
        .await
        .expect("store");
        db.store_item(ChunkTag::new(
            "chunk-c".into(),
            billing.id,
            "tenant-1".into(),
        ))
        .await
        .expect("store");

        // A chunk passes when any of its tags match.
        let matched = ChunkTag::chunk_ids_for_tag_names(
            "tenant-1",
            &["billing".to_string(), "legal".to_string()],
            &db,
        )
        .await
        .expect("filter");
        assert_eq!(matched.len(), 3);

        let only_billing =
            ChunkTag::chunk_ids_for_tag_names("tenant-1", &["billing".to_string()], &db)
                .await
                .expect("filter");
        assert_eq!(only_billing.len(), 2);
        assert!(only_billing.contains("chunk-a"));
        assert!(only_billing.contains("chunk-c"));

        let unknown = ChunkTag::chunk_ids_for_tag_names("tenant-1", &["nope".to_string()], &db)
            .await
            .expect("filter");
        assert!(unknown.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_chunk_removes_relations() {
        let db = memory_db().await;

        let tag = Tag::get_or_create("tenant-1", "ops", &db).await.expect("tag");
        db.store_item(ChunkTag::new("chunk-a".into(), tag.id.clone(), "tenant-1".into()))
            .await
            .expect("store");
        db.store_item(ChunkTag::new("chunk-b".into(), tag.id, "tenant-1".into()))
            .await
            .expect("store");

        ChunkTag::delete_by_chunk("chunk-a", &db).await.expect("delete");

        assert!(ChunkTag::list_by_chunk("chunk-a", &db)
            .await
            .expect("list")
            .is_empty());
        assert_eq!(
            ChunkTag::list_by_chunk("chunk-b", &db).await.expect("list").len(),
            1
        );
    }
}
