use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Tag, "tag", {
    tenant_id: String,
    name: String
});

impl Tag {
    pub fn new(tenant_id: String, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            tenant_id,
            name,
        }
    }

    /// Finds a tenant's tag by name, creating it when absent.
    pub async fn get_or_create(
        tenant_id: &str,
        name: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        if let Some(existing) = Self::find_by_name(tenant_id, name, db).await? {
            return Ok(existing);
        }

        let tag = Self::new(tenant_id.to_owned(), name.to_owned());
        db.store_item(tag.clone()).await?;
        Ok(tag)
    }

    pub async fn find_by_name(
        tenant_id: &str,
        name: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE tenant_id = $tenant_id AND name = $name
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("name", name.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    pub async fn find_by_names(
        tenant_id: &str,
        names: &[String],
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE tenant_id = $tenant_id AND name IN $names",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("names", names.to_vec()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let first = Tag::get_or_create("tenant-1", "billing", &db)
            .await
            .expect("create");
        let second = Tag::get_or_create("tenant-1", "billing", &db)
            .await
            .expect("reuse");
        assert_eq!(first.id, second.id);

        // Same name under another tenant is a distinct tag.
        let other = Tag::get_or_create("tenant-2", "billing", &db)
            .await
            .expect("create");
        assert_ne!(first.id, other.id);
    }
}
