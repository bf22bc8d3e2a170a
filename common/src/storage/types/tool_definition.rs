#![allow(clippy::module_name_repetitions)]
use crate::{error::AppError, params::ParamSpec, storage::db::SurrealDbClient, stored_object};

/// How a tool is invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolKind {
    /// POSTs the parameter bundle as JSON to the endpoint.
    HttpEndpoint { url: String },
    /// Runs a local command; parameters are passed as JSON on stdin.
    LocalScript { command: String },
}

stored_object!(ToolDefinition, "tool_definition", {
    code: String,
    name: String,
    description: String,
    kind: ToolKind,
    params_schema: Vec<ParamSpec>,
    default_timeout_secs: u64
});

impl ToolDefinition {
    pub fn new(
        code: String,
        name: String,
        description: String,
        kind: ToolKind,
        params_schema: Vec<ParamSpec>,
        default_timeout_secs: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            // The code doubles as the record key so lookups are a point get.
            id: code.clone(),
            created_at: now,
            updated_at: now,
            code,
            name,
            description,
            kind,
            params_schema,
            default_timeout_secs,
        }
    }

    pub async fn get_by_code(code: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        Ok(db.get_item(code).await?)
    }
}
