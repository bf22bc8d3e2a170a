#![allow(clippy::module_name_repetitions)]
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EmbeddingJobStatus {
    Created,
    InProgress {
        attempts: u32,
        last_attempt: DateTime<Utc>,
    },
    Completed,
    Error(String),
}

stored_object!(EmbeddingJob, "embedding_job", {
    document_id: String,
    tenant_id: String,
    model_code: String,
    status: EmbeddingJobStatus
});

pub const MAX_ATTEMPTS: u32 = 3;

impl EmbeddingJob {
    pub fn new(document_id: String, tenant_id: String, model_code: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            tenant_id,
            model_code,
            status: EmbeddingJobStatus::Created,
        }
    }

    /// Creates a new job and stores it in the database.
    pub async fn create_and_store(
        document_id: String,
        tenant_id: String,
        model_code: String,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let job = Self::new(document_id, tenant_id, model_code);
        db.store_item(job.clone()).await?;
        Ok(job)
    }

    pub async fn update_status(
        id: &str,
        status: EmbeddingJobStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _job: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", status))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;
        Ok(())
    }

    /// Unfinished jobs, oldest first: newly created, or in progress with
    /// attempts left.
    pub async fn get_unfinished(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let jobs: Vec<Self> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE
                    status = 'Created'
                    OR (
                        status.InProgress != NONE
                        AND status.InProgress.attempts < $max_attempts
                    )
                 ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("max_attempts", MAX_ATTEMPTS))
            .await?
            .take(0)?;

        Ok(jobs)
    }

    /// Claims the oldest unfinished job, marking it in progress with an
    /// incremented attempt count.
    pub async fn claim_next(db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let Some(job) = Self::get_unfinished(db).await?.into_iter().next() else {
            return Ok(None);
        };

        let attempts = match job.status {
            EmbeddingJobStatus::InProgress { attempts, .. } => attempts.saturating_add(1),
            _ => 1,
        };
        let status = EmbeddingJobStatus::InProgress {
            attempts,
            last_attempt: Utc::now(),
        };
        Self::update_status(&job.id, status.clone(), db).await?;

        Ok(Some(Self { status, ..job }))
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
    async fn test_claim_next_prefers_oldest_and_counts_attempts() {
        let db = memory_db().await;

        let mut older = EmbeddingJob::new("doc-1".into(), "tenant-1".into(), "embed-small".into());
        older.created_at = Utc::now() - chrono::Duration::seconds(10);
        let newer = EmbeddingJob::new("doc-2".into(), "tenant-1".into(), "embed-small".into());
        db.store_item(older.clone()).await.expect("store older");
        db.store_item(newer).await.expect("store newer");

        let claimed = EmbeddingJob::claim_next(&db)
            .await
            .expect("claim")
            .expect("job available");
        assert_eq!(claimed.document_id, "doc-1");
        assert!(
            matches!(claimed.status, EmbeddingJobStatus::InProgress { attempts: 1, .. })
        );

        // Claiming again picks the same oldest job with a bumped attempt.
        let reclaimed = EmbeddingJob::claim_next(&db)
            .await
            .expect("claim")
            .expect("job available");
        assert_eq!(reclaimed.document_id, "doc-1");
        assert!(
            matches!(reclaimed.status, EmbeddingJobStatus::InProgress { attempts: 2, .. })
        );
    }

    #[tokio::test]
    async fn test_exhausted_and_finished_jobs_are_not_claimable() {
        let db = memory_db().await;

        let mut exhausted = EmbeddingJob::new("doc-1".into(), "tenant-1".into(), "embed-small".into());
        exhausted.status = EmbeddingJobStatus::InProgress {
            attempts: MAX_ATTEMPTS,
            last_attempt: Utc::now(),
        };
        let mut done = EmbeddingJob::new("doc-2".into(), "tenant-1".into(), "embed-small".into());
        done.status = EmbeddingJobStatus::Completed;
        let mut failed = EmbeddingJob::new("doc-3".into(), "tenant-1".into(), "embed-small".into());
        failed.status = EmbeddingJobStatus::Error("gave up".into());

        db.store_item(exhausted).await.expect("store");
        db.store_item(done).await.expect("store");
        db.store_item(failed).await.expect("store");

        assert!(EmbeddingJob::claim_next(&db).await.expect("claim").is_none());
    }
}
