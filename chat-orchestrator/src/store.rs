use std::sync::Arc;

use chrono::{DateTime, Utc};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{chat_message::ChatMessage, chat_thread::ChatThread, citation::Citation},
    },
};

/// Token and cost aggregates of one successful turn, bound for the daily
/// usage bucket.
#[derive(Debug, Clone)]
pub struct TurnUsage {
    pub tenant_id: String,
    pub model_code: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub cost: f64,
}

/// Persistent state behind the orchestrator: threads, messages, citations
/// and usage counters.
pub struct ThreadStore {
    db: Arc<SurrealDbClient>,
}

impl ThreadStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Arc<SurrealDbClient> {
        &self.db
    }

    pub async fn get_thread(&self, id: &str, tenant_id: &str) -> Result<ChatThread, AppError> {
        ChatThread::get_for_tenant(id, tenant_id, &self.db).await
    }

    pub async fn list_threads(
        &self,
        tenant_id: &str,
        user_id: &str,
        page: usize,
        size: usize,
        search: Option<&str>,
    ) -> Result<Vec<ChatThread>, AppError> {
        ChatThread::list(tenant_id, user_id, page, size, search, &self.db).await
    }

    pub async fn soft_delete_thread(&self, id: &str, tenant_id: &str) -> Result<(), AppError> {
        ChatThread::soft_delete(id, tenant_id, &self.db).await
    }

    pub async fn save_message(&self, message: ChatMessage) -> Result<(), AppError> {
        self.db.store_item(message).await?;
        Ok(())
    }

    pub async fn list_messages(&self, thread_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        ChatMessage::list_by_thread(thread_id, &self.db).await
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<ChatMessage>, AppError> {
        ChatMessage::get(id, &self.db).await
    }

    pub async fn count_user_messages_since(
        &self,
        tenant_id: &str,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        ChatMessage::count_user_messages_since(tenant_id, user_id, since, &self.db).await
    }

    pub async fn save_citations_batch(&self, citations: Vec<Citation>) -> Result<(), AppError> {
        Citation::save_batch(citations, &self.db).await
    }

    /// Standalone usage write, for callers outside the transactional turn
    /// path (backfills, corrections).
    pub async fn save_usage(&self, usage: &TurnUsage) -> Result<(), AppError> {
        common::storage::types::usage_record::UsageRecord::record(
            &usage.tenant_id,
            &usage.model_code,
            usage.tokens_in,
            usage.tokens_out,
            usage.cost,
            &self.db,
        )
        .await
    }

    /// Persists a completed assistant turn: the message, its citations and
    /// the usage bucket update land in one transaction — all three or
    /// none.
    pub async fn save_turn(
        &self,
        message: &ChatMessage,
        citations: &[Citation],
        usage: &TurnUsage,
    ) -> Result<(), AppError> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let usage_key = format!("{}_{}_{}", usage.tenant_id, usage.model_code, day);

        let response = self
            .db
            .client
            .query(
                "BEGIN TRANSACTION;
                 CREATE type::thing('chat_message', $message_id) CONTENT $message;
                 FOR $citation IN $citations {
                     CREATE type::thing('citation', $citation.id) CONTENT $citation;
                 };
                 UPSERT type::thing('usage_record', $usage_key) SET
                     tenant_id = $usage_tenant,
                     model_code = $usage_model,
                     day = $day,
                     tokens_in = (tokens_in ?? 0) + $tokens_in,
                     tokens_out = (tokens_out ?? 0) + $tokens_out,
                     cost = (cost ?? 0) + $cost,
                     turns = (turns ?? 0) + 1,
                     created_at = created_at ?? time::now(),
                     updated_at = time::now();
                 COMMIT TRANSACTION;",
            )
            .bind(("message_id", message.id.clone()))
            .bind(("message", message.clone()))
            .bind(("citations", citations.to_vec()))
            .bind(("usage_key", usage_key))
            .bind(("usage_tenant", usage.tenant_id.clone()))
            .bind(("usage_model", usage.model_code.clone()))
            .bind(("day", day))
            .bind(("tokens_in", u64::from(usage.tokens_in)))
            .bind(("tokens_out", u64::from(usage.tokens_out)))
            .bind(("cost", usage.cost))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        ChatThread::touch(&message.thread_id, &self.db).await?;
        Ok(())
    }
}
