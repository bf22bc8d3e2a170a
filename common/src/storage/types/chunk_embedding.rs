#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Coarse confidence bucket attached to vector search scores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn from_score(score: f32) -> Self {
        if score >= 0.85 {
            Self::High
        } else if score >= 0.70 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// One nearest-neighbour result from the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    pub score: f32,
    pub confidence: Confidence,
}

stored_object!(ChunkEmbedding, "chunk_embedding", {
    chunk_id: String,
    document_id: String,
    tenant_id: String,
    model_code: String,
    vector_version: u32,
    embedding: Vec<f32>
});

impl ChunkEmbedding {
    pub fn new(
        chunk_id: String,
        document_id: String,
        tenant_id: String,
        model_code: String,
        vector_version: u32,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            chunk_id,
            document_id,
            tenant_id,
            model_code,
            vector_version,
            embedding,
        }
    }

    /// Replaces the (chunk, model) row when the incoming version is at
    /// least the stored one; a stale writer loses. The check and the swap
    /// run in one transaction so concurrent upserts reconcile to the
    /// highest vector version.
    pub async fn upsert(row: Self, db: &SurrealDbClient) -> Result<(), AppError> {
        let response = db
            .client
            .query(
                "BEGIN TRANSACTION;
                 LET $versions = (SELECT VALUE vector_version FROM chunk_embedding
                     WHERE chunk_id = $chunk_id AND model_code = $model_code);
                 LET $current = IF array::len($versions) > 0 THEN array::max($versions) ELSE 0 END;
                 IF $incoming >= $current THEN {
                     DELETE chunk_embedding WHERE chunk_id = $chunk_id AND model_code = $model_code;
                     CREATE type::thing('chunk_embedding', $row_id) CONTENT $row;
                 } END;
                 COMMIT TRANSACTION;",
            )
            .bind(("chunk_id", row.chunk_id.clone()))
            .bind(("model_code", row.model_code.clone()))
            .bind(("incoming", row.vector_version))
            .bind(("row_id", row.id.clone()))
            .bind(("row", row))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;
        Ok(())
    }

    /// Nearest-neighbour search by cosine similarity. Tenant isolation is a
    /// hard filter; results below `threshold` are dropped; ties break
    /// toward the smaller chunk id.
    pub async fn search(
        query_embedding: Vec<f32>,
        model_code: &str,
        tenant_id: &str,
        top_k: usize,
        threshold: f32,
        db: &SurrealDbClient,
    ) -> Result<Vec<VectorHit>, AppError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        #[derive(Deserialize)]
        struct Row {
            chunk_id: String,
            score: f32,
        }

        let sql = format!(
            r#"
            SELECT
                chunk_id,
                vector::similarity::cosine(embedding, $embedding) AS score
            FROM {table}
            WHERE tenant_id = $tenant_id
              AND model_code = $model_code
              AND embedding <|{take},100|> $embedding
            ORDER BY score DESC
            LIMIT {take};
            "#,
            table = Self::table_name(),
            take = top_k,
        );

        let mut response = db
            .query(&sql)
            .bind(("embedding", query_embedding))
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("model_code", model_code.to_owned()))
            .await
            .map_err(|e| AppError::InternalError(format!("Surreal query failed: {e}")))?;

        let rows: Vec<Row> = response.take::<Vec<Row>>(0).unwrap_or_default();

        let mut hits: Vec<VectorHit> = rows
            .into_iter()
            .filter(|row| row.score >= threshold)
            .map(|row| VectorHit {
                confidence: Confidence::from_score(row.score),
                chunk_id: row.chunk_id,
                score: row.score,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        Ok(hits)
    }

    pub async fn get_by_chunk_and_model(
        chunk_id: &str,
        model_code: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE chunk_id = $chunk_id AND model_code = $model_code
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("chunk_id", chunk_id.to_owned()))
            .bind(("model_code", model_code.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
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
