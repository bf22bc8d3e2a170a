use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::{chat_message::ChatMessage, citation::Citation};

/// Hard cap on page size for thread listings.
pub const MAX_PAGE_SIZE: usize = 100;

stored_object!(ChatThread, "chat_thread", {
    tenant_id: String,
    user_id: String,
    title: String,
    default_model: String,
    temperature: f32,
    flow_snapshot_id: Option<String>,
    system_prompt: Option<String>,
    #[serde(serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime", default)]
    deleted_at: Option<DateTime<Utc>>
});

impl ChatThread {
    pub fn new(
        tenant_id: String,
        user_id: String,
        title: String,
        default_model: String,
        temperature: f32,
        flow_snapshot_id: Option<String>,
        system_prompt: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id,
            user_id,
            title,
            default_model,
            temperature,
            flow_snapshot_id,
            system_prompt,
            deleted_at: None,
        }
    }

    /// Loads a thread visible to `tenant_id`; soft-deleted and
    /// foreign-tenant threads read as absent.
    pub async fn get_for_tenant(
        id: &str,
        tenant_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let thread: Option<Self> = db.get_item(id).await?;
        thread
            .filter(|t| t.tenant_id == tenant_id)
            .filter(|t| t.deleted_at.is_none())
            .ok_or_else(|| AppError::NotFound(format!("Thread {id} not found")))
    }

    /// Lists a user's live threads, most recently updated first. `size` is
    /// clamped to [`MAX_PAGE_SIZE`]; `search` filters on the title.
    pub async fn list(
        tenant_id: &str,
        user_id: &str,
        page: usize,
        size: usize,
        search: Option<&str>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let size = size.min(MAX_PAGE_SIZE);
        let offset = page.saturating_mul(size);

        let sql = if search.is_some() {
            "SELECT * FROM type::table($table)
             WHERE tenant_id = $tenant_id
               AND user_id = $user_id
               AND (deleted_at = NONE OR deleted_at = NULL)
               AND string::lowercase(title) CONTAINS string::lowercase($search)
             ORDER BY updated_at DESC
             LIMIT $limit START $offset"
        } else {
            "SELECT * FROM type::table($table)
             WHERE tenant_id = $tenant_id
               AND user_id = $user_id
               AND (deleted_at = NONE OR deleted_at = NULL)
             ORDER BY updated_at DESC
             LIMIT $limit START $offset"
        };

        let mut response = db
            .query(sql)
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("user_id", user_id.to_owned()))
            .bind(("search", search.unwrap_or_default().to_owned()))
            .bind(("limit", size as i64))
            .bind(("offset", offset as i64))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows)
    }

    /// Applies the provided settings changes and bumps `updated_at`.
    pub async fn update_settings(
        id: &str,
        tenant_id: &str,
        title: Option<String>,
        default_model: Option<String>,
        temperature: Option<f32>,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let thread = Self::get_for_tenant(id, tenant_id, db).await?;

        if let Some(temperature) = temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(AppError::Validation(format!(
                    "temperature {temperature} outside [0, 2]"
                )));
            }
        }

        let mut update = db
            .update((Self::table_name(), &thread.id))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ));
        if let Some(title) = title {
            update = update.patch(PatchOp::replace("/title", title));
        }
        if let Some(default_model) = default_model {
            update = update.patch(PatchOp::replace("/default_model", default_model));
        }
        if let Some(temperature) = temperature {
            update = update.patch(PatchOp::replace("/temperature", temperature));
        }

        let updated: Option<Self> = update.await?;
        updated.ok_or_else(|| AppError::NotFound(format!("Thread {id} not found")))
    }

    /// Bumps `updated_at` so the thread surfaces at the top of listings.
    pub async fn touch(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;
        Ok(())
    }

    /// Soft-deletes the thread and cascades to its messages and their
    /// citations.
    pub async fn soft_delete(
        id: &str,
        tenant_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let thread = Self::get_for_tenant(id, tenant_id, db).await?;

        let messages = ChatMessage::list_by_thread(&thread.id, db).await?;
        for message in &messages {
            Citation::delete_by_message(&message.id, db).await?;
        }
        db.client
            .query("DELETE type::table($table) WHERE thread_id = $thread_id")
            .bind(("table", ChatMessage::table_name()))
            .bind(("thread_id", thread.id.clone()))
            .await?
            .check()?;

        let _updated: Option<Self> = db
            .update((Self::table_name(), &thread.id))
            .patch(PatchOp::replace(
                "/deleted_at",
                surrealdb::sql::Datetime::default(),
            ))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;
        Ok(())
    }
}
