use crate::error::AppError;

use super::types::StoredObject;
use std::{ops::Deref, sync::Arc};
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

pub trait ProvidesDb {
    fn db(&self) -> &Arc<SurrealDbClient>;
}

impl SurrealDbClient {
    /// Connects, signs in and selects the namespace/database.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Defines the static schema: field indexes used by list and cascade
    /// queries. Vector and FTS indexes are handled separately because they
    /// depend on the embedding dimension (see `storage::indexes`).
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_document_tenant ON TABLE document FIELDS tenant_id;
                 DEFINE INDEX IF NOT EXISTS idx_document_hash ON TABLE document FIELDS tenant_id, content_hash;
                 DEFINE INDEX IF NOT EXISTS idx_chunk_document ON TABLE chunk FIELDS document_id;
                 DEFINE INDEX IF NOT EXISTS idx_chunk_tenant ON TABLE chunk FIELDS tenant_id;
                 DEFINE INDEX IF NOT EXISTS idx_embedding_chunk ON TABLE chunk_embedding FIELDS chunk_id, model_code;
                 DEFINE INDEX IF NOT EXISTS idx_thread_tenant_user ON TABLE chat_thread FIELDS tenant_id, user_id;
                 DEFINE INDEX IF NOT EXISTS idx_message_thread ON TABLE chat_message FIELDS thread_id;
                 DEFINE INDEX IF NOT EXISTS idx_citation_message ON TABLE citation FIELDS message_id;
                 DEFINE INDEX IF NOT EXISTS idx_usage_bucket ON TABLE usage_record FIELDS tenant_id, model_code, day;
                 DEFINE INDEX IF NOT EXISTS idx_grant_tenant_tool ON TABLE tool_grant FIELDS tenant_id, tool_code;
                 DEFINE INDEX IF NOT EXISTS idx_job_status ON TABLE embedding_job FIELDS status;
                 DEFINE INDEX IF NOT EXISTS idx_job_created ON TABLE embedding_job FIELDS created_at;",
            )
            .await?
            .check()?;

        Ok(())
    }

    pub async fn drop_table<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.delete(T::table_name()).await
    }

    /// Stores an object under its table and id.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Retrieves all rows of the object's table.
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Retrieves a single object by id.
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Deletes a single object by id, returning the deleted row.
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
