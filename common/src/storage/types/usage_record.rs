use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(UsageRecord, "usage_record", {
    tenant_id: String,
    model_code: String,
    day: String,
    tokens_in: u64,
    tokens_out: u64,
    cost: f64,
    turns: u64
});

impl UsageRecord {
    /// Deterministic bucket key so concurrent writers aggregate into the
    /// same row.
    fn bucket_key(tenant_id: &str, model_code: &str, day: &str) -> String {
        format!("{tenant_id}_{model_code}_{day}")
    }

    /// Adds a successful turn's tokens and cost into the tenant's daily
    /// bucket. Atomic upsert; write-only from the orchestrator.
    pub async fn record(
        tenant_id: &str,
        model_code: &str,
        tokens_in: u32,
        tokens_out: u32,
        cost: f64,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let key = Self::bucket_key(tenant_id, model_code, &day);

        db.client
            .query(
                "UPSERT type::thing('usage_record', $key) SET
                     tenant_id = $tenant_id,
                     model_code = $model_code,
                     day = $day,
                     tokens_in = (tokens_in ?? 0) + $tokens_in,
                     tokens_out = (tokens_out ?? 0) + $tokens_out,
                     cost = (cost ?? 0) + $cost,
                     turns = (turns ?? 0) + 1,
                     created_at = created_at ?? time::now(),
                     updated_at = time::now()",
            )
            .bind(("key", key))
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("model_code", model_code.to_owned()))
            .bind(("day", day))
            .bind(("tokens_in", u64::from(tokens_in)))
            .bind(("tokens_out", u64::from(tokens_out)))
            .bind(("cost", cost))
            .await?
            .check()?;
        Ok(())
    }

    /// Read side for reporting: a tenant's buckets for one day.
    pub async fn for_tenant_day(
        tenant_id: &str,
        day: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE tenant_id = $tenant_id AND day = $day",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .bind(("day", day.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_record_aggregates_into_daily_bucket() {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb");

        UsageRecord::record("tenant-1", "gpt-x", 100, 50, 0.002, &db)
            .await
            .expect("first turn");
        UsageRecord::record("tenant-1", "gpt-x", 30, 20, 0.001, &db)
            .await
            .expect("second turn");
        UsageRecord::record("tenant-1", "claude-y", 10, 5, 0.0005, &db)
            .await
            .expect("other model");

        let day = Utc::now().format("%Y-%m-%d").to_string();
        let buckets = UsageRecord::for_tenant_day("tenant-1", &day, &db)
            .await
            .expect("read");
        assert_eq!(buckets.len(), 2);

        let gpt = buckets
            .iter()
            .find(|b| b.model_code == "gpt-x")
            .expect("gpt bucket");
        assert_eq!(gpt.tokens_in, 130);
        assert_eq!(gpt.tokens_out, 70);
        assert_eq!(gpt.turns, 2);
        assert!((gpt.cost - 0.003).abs() < 1e-9);
    }
}
