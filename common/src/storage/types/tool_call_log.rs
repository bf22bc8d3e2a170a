#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolCallStatus {
    Succeeded,
    Failed { kind: String },
}

stored_object!(ToolCallLog, "tool_call_log", {
    tenant_id: String,
    tool_code: String,
    user_id: String,
    thread_id: Option<String>,
    params_hash: String,
    status: ToolCallStatus,
    latency_ms: u64,
    error: Option<String>
});

impl ToolCallLog {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: String,
        tool_code: String,
        user_id: String,
        thread_id: Option<String>,
        params_hash: String,
        status: ToolCallStatus,
        latency_ms: u64,
        error: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id,
            tool_code,
            user_id,
            thread_id,
            params_hash,
            status,
            latency_ms,
            error,
        }
    }

    pub async fn record(log: Self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.store_item(log).await?;
        Ok(())
    }

    pub async fn list_for_tenant(
        tenant_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE tenant_id = $tenant_id
                 ORDER BY created_at DESC",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows)
    }
}
