#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::{error::AppError, params::TypedParams, storage::db::SurrealDbClient, stored_object};

use super::citation::Citation;

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// Tool invocation attached to an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallPayload {
    pub tool_code: String,
    pub params: TypedParams,
    pub result: Option<String>,
}

stored_object!(ChatMessage, "chat_message", {
    thread_id: String,
    tenant_id: String,
    user_id: String,
    role: MessageRole,
    content: String,
    tool_call: Option<ToolCallPayload>,
    token_in: u32,
    token_out: u32,
    latency_ms: u64
});

impl ChatMessage {
    pub fn new(
        thread_id: String,
        tenant_id: String,
        user_id: String,
        role: MessageRole,
        content: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            thread_id,
            tenant_id,
            user_id,
            role,
            content,
            tool_call: None,
            token_in: 0,
            token_out: 0,
            latency_ms: 0,
        }
    }

    pub fn with_usage(mut self, token_in: u32, token_out: u32, latency_ms: u64) -> Self {
        self.token_in = token_in;
        self.token_out = token_out;
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_tool_call(mut self, tool_call: ToolCallPayload) -> Self {
        self.tool_call = Some(tool_call);
        self
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        Ok(db.get_item(id).await?)
    }

    /// Messages of a thread in creation order.
    pub async fn list_by_thread(
        thread_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE thread_id = $thread_id
                 ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("thread_id", thread_id.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows)
    }

    /// Number of USER messages a user sent inside the trailing window,
    /// backing the admission rate limit.
    pub async fn count_user_messages_since(
        tenant_id: &str,
        user_id: &str,
        since: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<u64, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            count: u64,
        }

        let mut response = db
            .query(
                "SELECT count() AS count FROM type::table($table)
                 WHERE tenant_id = $tenant_id
                   AND user_id = $user_id
                   AND role = 'User'
                   AND created_at > $since
                 GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("user_id", user_id.to_owned()))
            .bind(("since", surrealdb::sql::Datetime::from(since)))
            .await?;
        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows.first().map_or(0, |row| row.count))
    }

    /// Deletes assistant messages created strictly after `after` together
    /// with their citations; used by regeneration. Returns the deleted ids.
    pub async fn delete_assistant_after(
        thread_id: &str,
        after: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<Vec<String>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE thread_id = $thread_id
                   AND role = 'Assistant'
                   AND created_at > $after",
            )
            .bind(("table", Self::table_name()))
            .bind(("thread_id", thread_id.to_owned()))
            .bind(("after", surrealdb::sql::Datetime::from(after)))
            .await?;
        let stale: Vec<Self> = response.take(0)?;

        let mut deleted = Vec::with_capacity(stale.len());
        for message in stale {
            Citation::delete_by_message(&message.id, db).await?;
            let _removed: Option<Self> = db.delete_item(&message.id).await?;
            deleted.push(message.id);
        }
        Ok(deleted)
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "User"),
            MessageRole::Assistant => write!(f, "Assistant"),
            MessageRole::System => write!(f, "System"),
            MessageRole::Tool => write!(f, "Tool"),
        }
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}
