use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use common::{context::RequestContext, params::TypedParams};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteToolRequest {
    pub tenant_id: String,
    pub user_id: String,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub params: TypedParams,
    #[serde(default)]
    pub async_mode: bool,
    pub timeout_seconds: Option<u64>,
}

pub async fn execute_tool(
    State(state): State<ApiState>,
    Path(tool_code): Path<String>,
    Json(request): Json<ExecuteToolRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(timeout) = request.timeout_seconds {
        if timeout == 0 || timeout > state.config.tools.max_timeout_secs {
            return Err(ApiError::validation(format!(
                "timeoutSeconds must be in [1, {}]",
                state.config.tools.max_timeout_secs
            )));
        }
    }

    let ctx = RequestContext::new(request.tenant_id, request.user_id);
    let timeout = request.timeout_seconds.map(Duration::from_secs);

    if request.async_mode {
        let tools = state.tools;
        let thread_id = request.thread_id;
        let params = request.params;
        tokio::spawn(async move {
            if let Err(err) = tools
                .execute(&ctx, &tool_code, thread_id, params, timeout)
                .await
            {
                warn!(error = %err, "async tool execution failed");
            }
        });
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "success": true, "data": { "accepted": true } })),
        ));
    }

    let result = state
        .tools
        .execute(&ctx, &tool_code, request.thread_id, request.params, timeout)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": {
                "toolCode": result.tool_code,
                "content": result.content,
                "latencyMs": result.latency_ms,
            }
        })),
    ))
}
