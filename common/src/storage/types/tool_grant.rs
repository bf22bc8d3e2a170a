#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(ToolGrant, "tool_grant", {
    tenant_id: String,
    tool_code: String,
    quota_limit: u64,
    quota_used: u64,
    enabled: bool
});

impl ToolGrant {
    pub fn new(tenant_id: String, tool_code: String, quota_limit: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id,
            tool_code,
            quota_limit,
            quota_used: 0,
            enabled: true,
        }
    }

    pub async fn find(
        tenant_id: &str,
        tool_code: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE tenant_id = $tenant_id AND tool_code = $tool_code
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("tool_code", tool_code.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Reserves one quota unit by increment-then-check. The increment is a
    /// single atomic update; a reservation that lands above the limit is
    /// rolled back and reported as exceeded.
    pub async fn consume(
        tenant_id: &str,
        tool_code: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let mut response = db
            .query(
                "UPDATE type::table($table)
                 SET quota_used = (quota_used ?? 0) + 1, updated_at = time::now()
                 WHERE tenant_id = $tenant_id AND tool_code = $tool_code
                 RETURN AFTER",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("tool_code", tool_code.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        let grant = rows.into_iter().next().ok_or_else(|| {
            AppError::Forbidden(format!(
                "tenant {tenant_id} has no grant for tool {tool_code}"
            ))
        })?;

        if !grant.enabled {
            Self::release(tenant_id, tool_code, db).await?;
            return Err(AppError::Forbidden(format!(
                "grant for tool {tool_code} is disabled"
            )));
        }

        if grant.quota_used > grant.quota_limit {
            Self::release(tenant_id, tool_code, db).await?;
            return Err(AppError::QuotaExceeded(format!(
                "tool {tool_code} quota of {} exhausted",
                grant.quota_limit
            )));
        }

        Ok(grant)
    }

    /// Returns one quota unit, undoing a reservation whose execution
    /// failed.
    pub async fn release(
        tenant_id: &str,
        tool_code: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::table($table)
                 SET quota_used = IF (quota_used ?? 0) > 0 THEN quota_used - 1 ELSE 0 END,
                     updated_at = time::now()
                 WHERE tenant_id = $tenant_id AND tool_code = $tool_code",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("tool_code", tool_code.to_owned()))
            .await?
            .check()?;
        Ok(())
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
    async fn test_consume_increments_until_quota_breach() {
        let db = memory_db().await;

        db.store_item(ToolGrant::new("tenant-1".into(), "weather".into(), 2))
            .await
            .expect("store grant");

        assert_eq!(
            ToolGrant::consume("tenant-1", "weather", &db)
                .await
                .expect("first")
                .quota_used,
            1
        );
        assert_eq!(
            ToolGrant::consume("tenant-1", "weather", &db)
                .await
                .expect("second")
                .quota_used,
            2
        );

        let third = ToolGrant::consume("tenant-1", "weather", &db).await;
        assert!(matches!(third, Err(AppError::QuotaExceeded(_))));

        // The breached reservation was rolled back.
        let grant = ToolGrant::find("tenant-1", "weather", &db)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(grant.quota_used, 2);
    }

    #[tokio::test]
    async fn test_consume_without_grant_is_unauthorized() {
        let db = memory_db().await;

        let result = ToolGrant::consume("tenant-1", "weather", &db).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_release_never_underflows() {
        let db = memory_db().await;

        db.store_item(ToolGrant::new("tenant-1".into(), "weather".into(), 5))
            .await
            .expect("store grant");

        ToolGrant::release("tenant-1", "weather", &db)
            .await
            .expect("release");
        let grant = ToolGrant::find("tenant-1", "weather", &db)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(grant.quota_used, 0);
    }
}
