use std::sync::Arc;

use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Citation, "citation", {
    message_id: String,
    chunk_id: String,
    similarity: f32,
    model_code: String
});

impl Citation {
    pub fn new(message_id: String, chunk_id: String, similarity: f32, model_code: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            message_id,
            chunk_id,
            similarity,
            model_code,
        }
    }

    /// Stores a message's citations in one transaction.
    pub async fn save_batch(citations: Vec<Citation>, db: &SurrealDbClient) -> Result<(), AppError> {
        if citations.is_empty() {
            return Ok(());
        }

        let citations = Arc::new(citations);
        let response = db
            .client
            .query(
                "BEGIN TRANSACTION;
                 FOR $citation IN $citations {
                     CREATE type::thing('citation', $citation.id) CONTENT $citation;
                 };
                 COMMIT TRANSACTION;",
            )
            .bind(("citations", Arc::clone(&citations)))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn list_by_message(
        message_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE message_id = $message_id
                 ORDER BY similarity DESC",
            )
            .bind(("table", Self::table_name()))
            .bind(("message_id", message_id.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows)
    }

    pub async fn delete_by_message(message_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($table) WHERE message_id = $message_id")
            .bind(("table", Self::table_name()))
            .bind(("message_id", message_id.to_owned()))
            .await?
            .check()?;
        Ok(())
    }
}
