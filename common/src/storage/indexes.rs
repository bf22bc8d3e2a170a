use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{error::AppError, storage::db::SurrealDbClient};

const FTS_ANALYZER_NAME: &str = "app_en_fts_analyzer";
const HNSW_INDEX_NAME: &str = "idx_embedding_chunk_embedding";
const HNSW_TABLE: &str = "chunk_embedding";
const FTS_INDEX_NAME: &str = "chunk_fts_text_idx";
const FTS_TABLE: &str = "chunk";

/// Build runtime Surreal indexes (FTS + HNSW). Idempotent: safe to call
/// multiple times; the HNSW definition is overwritten when the embedding
/// dimension changes.
pub async fn ensure_runtime_indexes(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<(), AppError> {
    ensure_runtime_indexes_inner(db, embedding_dimension)
        .await
        .map_err(|err| AppError::InternalError(err.to_string()))
}

/// Rebuild the FTS index so freshly written chunks become searchable.
pub async fn rebuild_indexes(db: &SurrealDbClient) -> Result<(), AppError> {
    rebuild_indexes_inner(db)
        .await
        .map_err(|err| AppError::InternalError(err.to_string()))
}

async fn ensure_runtime_indexes_inner(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<()> {
    create_fts_analyzer(db).await?;

    let fts_definition = format!(
        "DEFINE INDEX IF NOT EXISTS {FTS_INDEX_NAME} ON TABLE {FTS_TABLE} FIELDS text \
         SEARCH ANALYZER {FTS_ANALYZER_NAME} BM25;"
    );
    db.client
        .query(fts_definition)
        .await
        .context("defining chunk FTS index")?
        .check()
        .context("chunk FTS index definition failed")?;

    match existing_hnsw_dimension(db).await? {
        Some(existing) if existing == embedding_dimension => {
            debug!(dimension = embedding_dimension, "HNSW index already current");
        }
        Some(existing) => {
            info!(
                existing_dimension = existing,
                target_dimension = embedding_dimension,
                "Overwriting HNSW index to match new embedding dimension"
            );
            define_hnsw(db, embedding_dimension, true).await?;
        }
        None => {
            define_hnsw(db, embedding_dimension, false).await?;
        }
    }

    Ok(())
}

async fn rebuild_indexes_inner(db: &SurrealDbClient) -> Result<()> {
    if !index_exists(db, FTS_TABLE, FTS_INDEX_NAME).await? {
        debug!("Skipping FTS rebuild because index is missing");
        return Ok(());
    }

    db.client
        .query(format!("REBUILD INDEX IF EXISTS {FTS_INDEX_NAME} ON {FTS_TABLE};"))
        .await
        .context("rebuilding chunk FTS index")?
        .check()
        .context("chunk FTS rebuild failed")?;
    Ok(())
}

async fn define_hnsw(db: &SurrealDbClient, dimension: usize, overwrite: bool) -> Result<()> {
    let clause = if overwrite { "OVERWRITE" } else { "IF NOT EXISTS" };
    let definition = format!(
        "DEFINE INDEX {clause} {HNSW_INDEX_NAME} ON TABLE {HNSW_TABLE} \
         FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE TYPE F32 EFC 100 M 8;"
    );

    db.client
        .query(definition)
        .await
        .context("defining HNSW index")?
        .check()
        .context("HNSW index definition failed")?;
    Ok(())
}

async fn create_fts_analyzer(db: &SurrealDbClient) -> Result<()> {
    // Prefer snowball stemming when supported; fall back to ascii-only when
    // the filter is unavailable in the running Surreal build.
    let snowball_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME}
            TOKENIZERS class
            FILTERS lowercase, ascii, snowball(english);"
    );

    match db.client.query(snowball_query).await {
        Ok(res) => {
            if res.check().is_ok() {
                return Ok(());
            }
            warn!(
                analyzer = FTS_ANALYZER_NAME,
                "Snowball analyzer check failed; attempting ascii fallback definition"
            );
        }
        Err(err) => {
            warn!(
                error = %err,
                "Snowball analyzer creation errored; attempting ascii fallback definition"
            );
        }
    }

    let fallback_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME}
            TOKENIZERS class
            FILTERS lowercase, ascii;"
    );

    db.client
        .query(fallback_query)
        .await
        .context("creating fallback FTS analyzer")?
        .check()
        .context("fallback FTS analyzer definition failed")?;

    Ok(())
}

async fn existing_hnsw_dimension(db: &SurrealDbClient) -> Result<Option<usize>> {
    let Some(indexes) = table_index_definitions(db, HNSW_TABLE).await? else {
        return Ok(None);
    };

    let Some(definition) = indexes
        .get(HNSW_INDEX_NAME)
        .and_then(|details| details.get("Strand"))
        .and_then(|v| v.as_str())
    else {
        return Ok(None);
    };

    Ok(extract_dimension(definition).and_then(|d| usize::try_from(d).ok()))
}

fn extract_dimension(definition: &str) -> Option<u64> {
    definition
        .split("DIMENSION")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|token| token.trim_end_matches(';').parse::<u64>().ok())
}

async fn table_index_definitions(
    db: &SurrealDbClient,
    table: &str,
) -> Result<Option<serde_json::Map<String, Value>>> {
    let info_query = format!("INFO FOR TABLE {table};");
    let mut response = db
        .client
        .query(info_query)
        .await
        .with_context(|| format!("fetching table info for {table}"))?;

    let info: surrealdb::Value = response
        .take(0)
        .context("failed to take table info response")?;

    let info_json: Value =
        serde_json::to_value(info).context("serializing table info to JSON for parsing")?;

    Ok(info_json
        .get("Object")
        .and_then(|o| o.get("indexes"))
        .and_then(|i| i.get("Object"))
        .and_then(|i| i.as_object())
        .cloned())
}

async fn index_exists(db: &SurrealDbClient, table: &str, index_name: &str) -> Result<bool> {
    let Some(indexes) = table_index_definitions(db, table).await? else {
        return Ok(false);
    };

    Ok(indexes.contains_key(index_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn extract_dimension_parses_value() {
        let definition = "DEFINE INDEX idx_embedding_chunk_embedding ON TABLE chunk_embedding FIELDS embedding HNSW DIMENSION 1536 DIST COSINE TYPE F32 EFC 100 M 8;";
        assert_eq!(extract_dimension(definition), Some(1536));
    }

    #[tokio::test]
    async fn ensure_runtime_indexes_is_idempotent() {
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("indexes_ns", database)
            .await
            .expect("in-memory db");
        db.ensure_schema().await.expect("schema");

        // First run creates everything
        ensure_runtime_indexes(&db, 1536)
            .await
            .expect("initial index creation");

        // Second run should be a no-op and still succeed
        ensure_runtime_indexes(&db, 1536)
            .await
            .expect("second index creation");
    }

    #[tokio::test]
    async fn ensure_hnsw_index_overwrites_dimension() {
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("indexes_dim", database)
            .await
            .expect("in-memory db");
        db.ensure_schema().await.expect("schema");

        ensure_runtime_indexes(&db, 1536)
            .await
            .expect("initial index creation");

        // Change dimension and ensure overwrite path is exercised
        ensure_runtime_indexes(&db, 128)
            .await
            .expect("overwritten index creation");

        let dimension = existing_hnsw_dimension(&db).await.expect("dimension");
        assert_eq!(dimension, Some(128));
    }

    #[tokio::test]
    async fn rebuild_skips_when_index_missing() {
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("indexes_rebuild", database)
            .await
            .expect("in-memory db");

        rebuild_indexes(&db).await.expect("rebuild without indexes");
    }
}
