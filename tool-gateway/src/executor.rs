use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use common::{
    context::RequestContext,
    counters::SlidingWindow,
    error::AppError,
    params::TypedParams,
    runtime::FairPool,
    storage::{
        db::SurrealDbClient,
        types::{
            tool_call_log::{ToolCallLog, ToolCallStatus},
            tool_definition::{ToolDefinition, ToolKind},
            tool_grant::ToolGrant,
        },
    },
    utils::config::ToolsConfig,
};

use crate::patterns::find_dangerous;

/// Sliding rate-limit window for tool executions.
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Successful output of one tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool_code: String,
    pub content: String,
    pub latency_ms: u64,
}

/// Invokes registered external tools under authorization, validation,
/// quota, rate limiting and a per-call timeout. Every call leaves a log
/// record whatever the outcome.
pub struct ToolExecutor {
    db: Arc<SurrealDbClient>,
    http: reqwest::Client,
    limits: SlidingWindow,
    pool: Arc<FairPool>,
    config: ToolsConfig,
}

impl ToolExecutor {
    pub fn new(db: Arc<SurrealDbClient>, pool: Arc<FairPool>, config: ToolsConfig) -> Self {
        if config.sandbox_enabled {
            warn!("tool sandbox toggle is set; resource limits are not enforced in this build");
        }
        Self {
            db,
            http: reqwest::Client::new(),
            limits: SlidingWindow::new(),
            pool,
            config,
        }
    }

    /// Executes `tool_code` for the calling tenant. See the gate order in
    /// the match arms below; a quota reservation is rolled back when the
    /// execution itself fails.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        tool_code: &str,
        thread_id: Option<String>,
        params: TypedParams,
        timeout_override: Option<Duration>,
    ) -> Result<ToolResult, AppError> {
        let definition = ToolDefinition::get_by_code(tool_code, &self.db)
            .await?
            .ok_or_else(|| AppError::Forbidden(format!("tool {tool_code} is not registered")))?;

        params
            .validate(&definition.params_schema)
            .map_err(|reason| AppError::Validation(format!("invalid parameters: {reason}")))?;

        if let Some(value) = find_dangerous(&params.string_values()) {
            let truncated: String = value.chars().take(64).collect();
            return Err(AppError::Validation(format!(
                "dangerous parameter rejected: {truncated}"
            )));
        }

        let rate_key = format!("{}:{}", ctx.tenant_id, tool_code);
        let in_window = self.limits.record_and_count(&rate_key, RATE_WINDOW);
        if in_window > self.config.rate_limit_per_minute {
            self.limits.forget_last(&rate_key);
            return Err(AppError::RateLimited {
                retry_after_secs: RATE_WINDOW.as_secs(),
            });
        }

        // Increment-then-check; a failed execution returns the unit below.
        ToolGrant::consume(&ctx.tenant_id, tool_code, &self.db).await?;

        let timeout = timeout_override
            .unwrap_or(Duration::from_secs(definition.default_timeout_secs))
            .min(Duration::from_secs(self.config.max_timeout_secs));

        let params_hash = params.content_hash();
        let started = Instant::now();

        let _slot = self.pool.acquire(&ctx.tenant_id).await;
        let outcome = tokio::time::timeout(timeout, self.invoke(&definition, &params)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(content)) => {
                self.write_log(
                    ctx,
                    tool_code,
                    thread_id,
                    params_hash,
                    ToolCallStatus::Succeeded,
                    latency_ms,
                    None,
                )
                .await;
                info!(tool_code, tenant_id = %ctx.tenant_id, latency_ms, "tool executed");
                Ok(ToolResult {
                    tool_code: tool_code.to_owned(),
                    content,
                    latency_ms,
                })
            }
            Ok(Err(err)) => {
                ToolGrant::release(&ctx.tenant_id, tool_code, &self.db).await?;
                self.write_log(
                    ctx,
                    tool_code,
                    thread_id,
                    params_hash,
                    ToolCallStatus::Failed {
                        kind: "execution".to_string(),
                    },
                    latency_ms,
                    Some(err.to_string()),
                )
                .await;
                Err(err)
            }
            Err(_elapsed) => {
                ToolGrant::release(&ctx.tenant_id, tool_code, &self.db).await?;
                self.write_log(
                    ctx,
                    tool_code,
                    thread_id,
                    params_hash,
                    ToolCallStatus::Failed {
                        kind: "timeout".to_string(),
                    },
                    latency_ms,
                    Some(format!("timed out after {}ms", timeout.as_millis())),
                )
                .await;
                // No retry on timeout.
                Err(AppError::ProviderTimeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn invoke(
        &self,
        definition: &ToolDefinition,
        params: &TypedParams,
    ) -> Result<String, AppError> {
        match &definition.kind {
            ToolKind::HttpEndpoint { url } => {
                let response = self.http.post(url).json(&params).send().await?;
                let status = response.status();
                let body = response.text().await?;
                if !status.is_success() {
                    return Err(AppError::InternalError(format!(
                        "tool endpoint returned {status}: {body}"
                    )));
                }
                Ok(body)
            }
            ToolKind::LocalScript { command } => {
                let mut child = Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .spawn()?;

                if let Some(mut stdin) = child.stdin.take() {
                    let payload = serde_json::to_vec(&params)
                        .map_err(|e| AppError::InternalError(e.to_string()))?;
                    stdin.write_all(&payload).await?;
                }

                let output = child.wait_with_output().await?;
                if !output.status.success() {
                    return Err(AppError::InternalError(format!(
                        "tool script exited with {}: {}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_log(
        &self,
        ctx: &RequestContext,
        tool_code: &str,
        thread_id: Option<String>,
        params_hash: String,
        status: ToolCallStatus,
        latency_ms: u64,
        error: Option<String>,
    ) {
        let log = ToolCallLog::new(
            ctx.tenant_id.clone(),
            tool_code.to_owned(),
            ctx.user_id.clone(),
            thread_id,
            params_hash,
            status,
            latency_ms,
            error,
        );
        if let Err(err) = ToolCallLog::record(log, &self.db).await {
            // The call already happened; a lost log line must not fail it.
            debug!(error = %err, "failed to write tool call log");
        }
    }
}
