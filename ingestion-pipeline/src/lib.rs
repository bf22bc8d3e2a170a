#![allow(clippy::missing_docs_in_private_items)]

pub mod chunker;
pub mod pipeline;

use common::storage::{db::SurrealDbClient, types::embedding_job::EmbeddingJob};
pub use pipeline::{IngestionPipeline, NewDocument};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// Background embedding worker: claims unfinished jobs oldest-first and
/// runs them through the pipeline, backing off when idle.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    ingestion_pipeline: Arc<IngestionPipeline>,
) -> Result<(), Box<dyn std::error::Error>> {
    let idle_backoff = Duration::from_millis(500);

    loop {
        match EmbeddingJob::claim_next(&db).await {
            Ok(Some(job)) => {
                let job_id = job.id.clone();
                info!(%job_id, document_id = %job.document_id, "claimed embedding job");
                if let Err(err) = ingestion_pipeline.process_job(job).await {
                    error!(%job_id, error = %err, "embedding job failed");
                }
            }
            Ok(None) => {
                sleep(idle_backoff).await;
            }
            Err(err) => {
                error!(error = %err, "failed to claim embedding job");
                warn!("Backing off for 1s after claim error");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
