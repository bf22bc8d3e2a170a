use std::collections::HashSet;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::chunk::Chunk, types::StoredObject},
};

use crate::scoring::min_max_normalize;

/// A chunk matched by the lexical (BM25 FTS) side, score normalized to
/// [0, 1] within the result set.
#[derive(Debug, Clone)]
pub struct LexicalMatch {
    pub chunk: Chunk,
    pub score: f32,
}

/// Full-text search over chunk text. Filters (document subset and the
/// resolved tag chunk set) are applied before scoring; scores are min-max
/// normalized.
pub async fn lexical_search(
    tenant_id: &str,
    terms: &str,
    take: usize,
    document_filter: Option<&[String]>,
    allowed_chunks: Option<&HashSet<String>>,
    db: &SurrealDbClient,
) -> Result<Vec<LexicalMatch>, AppError> {
    if take == 0 || terms.trim().is_empty() {
        return Ok(Vec::new());
    }

    #[derive(serde::Deserialize)]
    struct Row {
        chunk_id: String,
        score: f32,
    }

    // Over-fetch so pre-score filtering still fills the page.
    let limit = i64::try_from(take.saturating_mul(4)).unwrap_or(i64::MAX);

    let document_condition = if document_filter.is_some() {
        " AND document_id IN $documents"
    } else {
        ""
    };

    let sql = format!(
        r#"
        SELECT
            record::id(id) AS chunk_id,
            IF search::score(0) != NONE THEN search::score(0) ELSE 0 END AS score
        FROM {table}
        WHERE text @0@ $terms
          AND tenant_id = $tenant_id{document_condition}
        ORDER BY score DESC
        LIMIT $limit;
        "#,
        table = Chunk::table_name(),
    );

    let mut response = db
        .query(&sql)
        .bind(("terms", terms.to_owned()))
        .bind(("tenant_id", tenant_id.to_owned()))
        .bind((
            "documents",
            document_filter.map(<[String]>::to_vec).unwrap_or_default(),
        ))
        .bind(("limit", limit))
        .await
        .map_err(|e| AppError::InternalError(format!("Surreal query failed: {e}")))?;

    let response = response.check().map_err(AppError::Database);
    let mut response = match response {
        Ok(response) => response,
        // An FTS query without the index defined yields no lexical side.
        Err(_) => return Ok(Vec::new()),
    };

    let rows: Vec<Row> = response.take::<Vec<Row>>(0).unwrap_or_default();

    let filtered: Vec<Row> = rows
        .into_iter()
        .filter(|row| {
            allowed_chunks.is_none_or(|allowed| allowed.contains(&row.chunk_id))
        })
        .collect();

    let normalized = min_max_normalize(&filtered.iter().map(|r| r.score).collect::<Vec<_>>());

    let mut matches = Vec::with_capacity(filtered.len().min(take));
    for (row, score) in filtered.into_iter().zip(normalized) {
        if matches.len() == take {
            break;
        }
        if let Some(chunk) = Chunk::get(&row.chunk_id, db).await? {
            matches.push(LexicalMatch { chunk, score });
        }
    }

    Ok(matches)
}
