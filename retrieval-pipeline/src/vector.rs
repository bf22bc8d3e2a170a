use std::collections::HashSet;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chunk::Chunk,
            chunk_embedding::{ChunkEmbedding, Confidence, VectorHit},
            StoredObject,
        },
    },
};

/// A vector hit hydrated with its chunk row.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub chunk: Chunk,
    pub score: f32,
    pub confidence: Confidence,
}

/// Nearest-neighbour search with the C6 filters pushed into the query, so
/// tag/document restrictions apply before scoring. Tenant isolation, the
/// score threshold and tie-breaking follow the index contract.
#[allow(clippy::too_many_arguments)]
pub async fn vector_search(
    query_embedding: Vec<f32>,
    model_code: &str,
    tenant_id: &str,
    top_k: usize,
    threshold: f32,
    document_filter: Option<&[String]>,
    allowed_chunks: Option<&HashSet<String>>,
    db: &SurrealDbClient,
) -> Result<Vec<VectorMatch>, AppError> {
    if top_k == 0 {
        return Ok(Vec::new());
    }

    let hits = match (document_filter, allowed_chunks) {
        (None, None) => {
            ChunkEmbedding::search(query_embedding, model_code, tenant_id, top_k, threshold, db)
                .await?
        }
        _ => {
            filtered_search(
                query_embedding,
                model_code,
                tenant_id,
                top_k,
                threshold,
                document_filter,
                allowed_chunks,
                db,
            )
            .await?
        }
    };

    let mut matches = Vec::with_capacity(hits.len());
    for hit in hits {
        if let Some(chunk) = Chunk::get(&hit.chunk_id, db).await? {
            matches.push(VectorMatch {
                chunk,
                score: hit.score,
                confidence: hit.confidence,
            });
        }
    }
    Ok(matches)
}

#[allow(clippy::too_many_arguments)]
async fn filtered_search(
    query_embedding: Vec<f32>,
    model_code: &str,
    tenant_id: &str,
    top_k: usize,
    threshold: f32,
    document_filter: Option<&[String]>,
    allowed_chunks: Option<&HashSet<String>>,
    db: &SurrealDbClient,
) -> Result<Vec<VectorHit>, AppError> {
    #[derive(serde::Deserialize)]
    struct Row {
        chunk_id: String,
        score: f32,
    }

    let mut conditions = String::new();
    if document_filter.is_some() {
        conditions.push_str(" AND document_id IN $documents");
    }
    if allowed_chunks.is_some() {
        conditions.push_str(" AND chunk_id IN $chunk_ids");
    }

    let sql = format!(
        r#"
        SELECT
            chunk_id,
            vector::similarity::cosine(embedding, $embedding) AS score
        FROM {table}
        WHERE tenant_id = $tenant_id
          AND model_code = $model_code{conditions}
          AND embedding <|{take},100|> $embedding
        ORDER BY score DESC
        LIMIT {take};
        "#,
        table = ChunkEmbedding::table_name(),
        take = top_k,
    );

    let mut response = db
        .query(&sql)
        .bind(("embedding", query_embedding))
        .bind(("tenant_id", tenant_id.to_owned()))
        .bind(("model_code", model_code.to_owned()))
        .bind((
            "documents",
            document_filter.map(<[String]>::to_vec).unwrap_or_default(),
        ))
        .bind((
            "chunk_ids",
            allowed_chunks
                .map(|set| set.iter().cloned().collect::<Vec<_>>())
                .unwrap_or_default(),
        ))
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

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::indexes::ensure_runtime_indexes;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("vector_ns", &database)
            .await
            .expect("in-memory db");
        db.ensure_schema().await.expect("schema");
        ensure_runtime_indexes(&db, 3).await.expect("indexes");
        db
    }

    async fn seed_chunk(
        db: &SurrealDbClient,
        chunk_id: &str,
        document_id: &str,
        vector: Vec<f32>,
    ) {
        let mut chunk = Chunk::new(
            document_id.to_string(),
            "tenant-1".to_string(),
            0,
            format!("text of {chunk_id}"),
            "en".to_string(),
            4,
        );
        chunk.id = chunk_id.to_string();
        db.store_item(chunk).await.expect("store chunk");

        ChunkEmbedding::upsert(
            ChunkEmbedding::new(
                chunk_id.to_string(),
                document_id.to_string(),
                "tenant-1".to_string(),
                "embed-small".to_string(),
                1,
                vector,
            ),
            db,
        )
        .await
        .expect("store embedding");
    }

    #[tokio::test]
    async fn hydrates_chunks_in_score_order() {
        let db = memory_db().await;
        seed_chunk(&db, "near", "d1", vec![1.0, 0.0, 0.0]).await;
        seed_chunk(&db, "far", "d1", vec![0.0, 1.0, 0.0]).await;

        let matches = vector_search(
            vec![1.0, 0.0, 0.0],
            "embed-small",
            "tenant-1",
            5,
            -1.0,
            None,
            None,
            &db,
        )
        .await
        .expect("search");

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].chunk.id, "near");
        assert_eq!(matches[0].confidence, Confidence::High);
        assert!(matches[0].score > matches[1].score);
    }

    #[tokio::test]
    async fn document_filter_is_a_strict_subset() {
        let db = memory_db().await;
        seed_chunk(&db, "in-doc", "d1", vec![1.0, 0.0, 0.0]).await;
        seed_chunk(&db, "out-doc", "d2", vec![1.0, 0.0, 0.0]).await;

        let matches = vector_search(
            vec![1.0, 0.0, 0.0],
            "embed-small",
            "tenant-1",
            5,
            0.0,
            Some(&["d1".to_string()]),
            None,
            &db,
        )
        .await
        .expect("search");

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].chunk.id, "in-doc");
    }

    #[tokio::test]
    async fn chunk_filter_restricts_candidates() {
        let db = memory_db().await;
        seed_chunk(&db, "tagged", "d1", vec![1.0, 0.0, 0.0]).await;
        seed_chunk(&db, "untagged", "d1", vec![1.0, 0.0, 0.0]).await;

        let allowed: HashSet<String> = ["tagged".to_string()].into_iter().collect();
        let matches = vector_search(
            vec![1.0, 0.0, 0.0],
            "embed-small",
            "tenant-1",
            5,
            0.0,
            None,
            Some(&allowed),
            &db,
        )
        .await
        .expect("search");

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].chunk.id, "tagged");
    }
}
