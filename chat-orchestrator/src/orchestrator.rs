use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use common::{
    context::RequestContext,
    error::AppError,
    params::TypedParams,
    runtime::Runtime,
    storage::types::{
        chat_message::{ChatMessage, MessageRole, ToolCallPayload},
        chat_thread::ChatThread,
        citation::Citation,
    },
    utils::config::AppConfig,
};
use llm_gateway::{
    ChunkSink, CompletionContext, CompletionOutcome, PromptMessage, PromptRole, ProviderRouter,
    ToolResultRecord,
};
use retrieval_pipeline::{Hit, RetrievalMode, RetrievalOptions, RetrievalService};
use tool_gateway::ToolExecutor;

use crate::{
    admission::AdmissionController,
    commands::{CreateThread, Regenerate, SendMessage, TurnResponse, UpdateThread},
    events::{EventSink, StepPhase, StreamEvent},
    store::{ThreadStore, TurnUsage},
};

/// Independent deadlines for the optional subtasks of a turn.
const RETRIEVE_DEADLINE: Duration = Duration::from_secs(5);
const TOOLS_DEADLINE: Duration = Duration::from_secs(30);
const FLOW_DEADLINE: Duration = Duration::from_secs(300);

/// Text hints that flip the retrieval / tool subtasks on when the caller
/// left the explicit flags unset.
const RETRIEVAL_HINTS: [&str; 5] = ["search", "find", "what is", "what's", "lookup"];
const TOOL_HINTS: [&str; 4] = ["execute", "call", "tool", "run "];

/// Executes a thread's flow snapshot and returns context lines for the
/// prompt. Deployments without a flow engine use the no-op implementation
/// so the orchestrator never branches on absence.
#[async_trait]
pub trait FlowRunner: Send + Sync {
    async fn run(
        &self,
        ctx: &RequestContext,
        snapshot_id: &str,
        content: &str,
    ) -> Result<Vec<String>, AppError>;
}

pub struct NoopFlowRunner;

#[async_trait]
impl FlowRunner for NoopFlowRunner {
    async fn run(
        &self,
        _ctx: &RequestContext,
        _snapshot_id: &str,
        _content: &str,
    ) -> Result<Vec<String>, AppError> {
        Ok(Vec::new())
    }
}

/// Which optional subtasks a turn runs.
#[derive(Debug, Clone, Copy)]
struct Strategy {
    retrieve: bool,
    tools: bool,
    flow: bool,
}

/// Everything the optional subtasks produced for one turn.
struct SubtaskOutput {
    hits: Vec<Hit>,
    tool_results: Vec<ToolResultRecord>,
    flow_context: Vec<String>,
    warnings: Vec<String>,
}

/// The conversation engine: per user message it gates admission, runs the
/// enabled subtasks concurrently, assembles the provider context, calls
/// the router and persists the finished turn.
pub struct ChatOrchestrator {
    store: ThreadStore,
    router: Arc<ProviderRouter>,
    retrieval: Arc<RetrievalService>,
    tools: Arc<ToolExecutor>,
    flow: Arc<dyn FlowRunner>,
    runtime: Arc<Runtime>,
    admission: AdmissionController,
    config: AppConfig,
    thread_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChatOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: ThreadStore,
        router: Arc<ProviderRouter>,
        retrieval: Arc<RetrievalService>,
        tools: Arc<ToolExecutor>,
        flow: Arc<dyn FlowRunner>,
        runtime: Arc<Runtime>,
        config: AppConfig,
    ) -> Self {
        let admission =
            AdmissionController::new(config.chat.clone(), config.knowledge.clone());
        Self {
            store,
            router,
            retrieval,
            tools,
            flow,
            runtime,
            admission,
            config,
            thread_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ThreadStore {
        &self.store
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    // ---- thread CRUD ----

    pub async fn create_thread(
        &self,
        ctx: &RequestContext,
        cmd: CreateThread,
    ) -> Result<ChatThread, AppError> {
        let temperature = cmd
            .temperature
            .unwrap_or(self.config.chat.default_temperature);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(AppError::Validation(format!(
                "temperature {temperature} outside [0, 2]"
            )));
        }
        if !self.router.serves_model(&cmd.default_model) {
            return Err(AppError::Validation(format!(
                "model {} is not served by any configured provider",
                cmd.default_model
            )));
        }

        let thread = ChatThread::new(
            ctx.tenant_id.clone(),
            ctx.user_id.clone(),
            cmd.title,
            cmd.default_model,
            temperature,
            cmd.flow_snapshot_id,
            cmd.system_prompt.clone(),
        );
        self.store.db().store_item(thread.clone()).await?;

        // A system prompt occupies position zero of the thread.
        if let Some(system_prompt) = cmd.system_prompt {
            self.store
                .save_message(ChatMessage::new(
                    thread.id.clone(),
                    ctx.tenant_id.clone(),
                    ctx.user_id.clone(),
                    MessageRole::System,
                    system_prompt,
                ))
                .await?;
        }

        Ok(thread)
    }

    pub async fn update_thread(
        &self,
        ctx: &RequestContext,
        thread_id: &str,
        cmd: UpdateThread,
    ) -> Result<ChatThread, AppError> {
        if let Some(model) = &cmd.default_model {
            if !self.router.serves_model(model) {
                return Err(AppError::Validation(format!(
                    "model {model} is not served by any configured provider"
                )));
            }
        }
        ChatThread::update_settings(
            thread_id,
            &ctx.tenant_id,
            cmd.title,
            cmd.default_model,
            cmd.temperature,
            self.store.db(),
        )
        .await
    }

    pub async fn delete_thread(
        &self,
        ctx: &RequestContext,
        thread_id: &str,
    ) -> Result<(), AppError> {
        self.store.soft_delete_thread(thread_id, &ctx.tenant_id).await
    }

    pub async fn get_thread(
        &self,
        ctx: &RequestContext,
        thread_id: &str,
    ) -> Result<ChatThread, AppError> {
        self.store.get_thread(thread_id, &ctx.tenant_id).await
    }

    // ---- messaging ----

    /// One synchronous turn. Steps 3–8 of the turn run under the thread's
    /// mutex so concurrent sends on one thread serialize in arrival order.
    #[instrument(skip_all, fields(thread_id))]
    pub async fn send_message(
        &self,
        ctx: &RequestContext,
        thread_id: &str,
        cmd: SendMessage,
    ) -> Result<TurnResponse, AppError> {
        let lock = self.thread_lock(thread_id);
        let _guard = lock.lock().await;

        let thread = self.store.get_thread(thread_id, &ctx.tenant_id).await?;
        self.admission
            .admit_message(ctx, &cmd.content, self.store.db())
            .await?;
        self.validate_model_override(&cmd)?;

        let user_message = self.persist_user_message(ctx, &thread, &cmd.content).await?;
        let strategy = self.select_strategy(&cmd, &thread);
        let subtasks = self.run_subtasks(ctx, &thread, &cmd, strategy).await;

        let completion_ctx = self.build_context(&thread, &cmd, &subtasks).await?;
        let outcome = self.router.complete(&completion_ctx).await?;

        let response = self
            .finish_turn(ctx, &thread, &completion_ctx.model, outcome, subtasks)
            .await?;
        info!(
            thread_id = %thread.id,
            user_message_id = %user_message.id,
            assistant_message_id = %response.message.id,
            "turn completed"
        );
        Ok(response)
    }

    /// Streaming variant: emits the mandatory event sequence into `sink`.
    /// A mid-stream provider failure terminates with `error` and persists
    /// no assistant row.
    #[instrument(skip_all, fields(thread_id))]
    pub async fn stream_message(
        &self,
        ctx: &RequestContext,
        thread_id: &str,
        cmd: SendMessage,
        sink: &mut dyn EventSink,
    ) -> Result<TurnResponse, AppError> {
        let lock = self.thread_lock(thread_id);
        let _guard = lock.lock().await;

        let thread = self.store.get_thread(thread_id, &ctx.tenant_id).await?;
        self.admission
            .admit_message(ctx, &cmd.content, self.store.db())
            .await?;
        self.validate_model_override(&cmd)?;

        let user_message = self.persist_user_message(ctx, &thread, &cmd.content).await?;
        sink.emit(StreamEvent::Start {
            thread_id: thread.id.clone(),
            user_message_id: user_message.id.clone(),
        })
        .await;

        let strategy = self.select_strategy(&cmd, &thread);
        let subtasks = self.run_subtasks(ctx, &thread, &cmd, strategy).await;
        sink.emit(StreamEvent::Step {
            phase: StepPhase::Retrieval,
            detail: format!("{} hits", subtasks.hits.len()),
        })
        .await;
        sink.emit(StreamEvent::Step {
            phase: StepPhase::Tools,
            detail: format!("{} results", subtasks.tool_results.len()),
        })
        .await;

        let completion_ctx = self.build_context(&thread, &cmd, &subtasks).await?;
        sink.emit(StreamEvent::Step {
            phase: StepPhase::Generating,
            detail: completion_ctx.model.clone(),
        })
        .await;

        let mut forward = ForwardingSink { inner: sink };
        let outcome = self.router.stream(&completion_ctx, &mut forward).await?;

        match self
            .finish_turn(ctx, &thread, &completion_ctx.model, outcome, subtasks)
            .await
        {
            Ok(response) => {
                sink.emit(StreamEvent::Complete {
                    summary: response.summary(),
                })
                .await;
                Ok(response)
            }
            Err(err) => {
                sink.emit(StreamEvent::Error {
                    message: "failed to persist the assistant turn".to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    /// Re-runs the assistant turn for an existing user message, deleting
    /// any assistant messages that followed it. Never streams.
    #[instrument(skip_all, fields(thread_id))]
    pub async fn regenerate(
        &self,
        ctx: &RequestContext,
        thread_id: &str,
        cmd: Regenerate,
    ) -> Result<TurnResponse, AppError> {
        let lock = self.thread_lock(thread_id);
        let _guard = lock.lock().await;

        let thread = self.store.get_thread(thread_id, &ctx.tenant_id).await?;
        let user_message = self
            .store
            .get_message(&cmd.user_message_id)
            .await?
            .filter(|m| m.thread_id == thread.id && m.tenant_id == ctx.tenant_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("message {} not found", cmd.user_message_id))
            })?;
        if user_message.role != MessageRole::User {
            return Err(AppError::Validation(
                "only user messages can be regenerated".to_string(),
            ));
        }

        ChatMessage::delete_assistant_after(&thread.id, user_message.created_at, self.store.db())
            .await?;

        let synthesized = SendMessage {
            content: user_message.content.clone(),
            model: cmd.model,
            temperature: cmd.temperature,
            max_tokens: cmd.max_tokens,
            ..SendMessage::default()
        };
        let strategy = self.select_strategy(&synthesized, &thread);
        let subtasks = self.run_subtasks(ctx, &thread, &synthesized, strategy).await;

        let mut completion_ctx = self.build_context(&thread, &synthesized, &subtasks).await?;
        // History stops at the regenerated message; later user turns stay
        // out of the prompt.
        completion_ctx.messages = self
            .history_messages(&thread, user_message.created_at)
            .await?;

        let outcome = self.router.complete(&completion_ctx).await?;
        self.finish_turn(ctx, &thread, &completion_ctx.model, outcome, subtasks)
            .await
    }

    // ---- internals ----

    fn thread_lock(&self, thread_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        #[allow(clippy::expect_used)]
        let mut locks = self.thread_locks.lock().expect("thread lock map poisoned");
        Arc::clone(locks.entry(thread_id.to_owned()).or_default())
    }

    fn validate_model_override(&self, cmd: &SendMessage) -> Result<(), AppError> {
        if let Some(model) = &cmd.model {
            if !self.router.serves_model(model) {
                return Err(AppError::Validation(format!(
                    "model {model} is not served by any configured provider"
                )));
            }
        }
        Ok(())
    }

    async fn persist_user_message(
        &self,
        ctx: &RequestContext,
        thread: &ChatThread,
        content: &str,
    ) -> Result<ChatMessage, AppError> {
        let message = ChatMessage::new(
            thread.id.clone(),
            ctx.tenant_id.clone(),
            ctx.user_id.clone(),
            MessageRole::User,
            content.to_owned(),
        );
        self.store.save_message(message.clone()).await?;
        Ok(message)
    }

    fn select_strategy(&self, cmd: &SendMessage, thread: &ChatThread) -> Strategy {
        let text = cmd.content.to_lowercase();
        Strategy {
            retrieve: cmd
                .enable_knowledge_retrieval
                .unwrap_or_else(|| RETRIEVAL_HINTS.iter().any(|hint| text.contains(hint))),
            tools: cmd
                .enable_tool_calling
                .unwrap_or_else(|| TOOL_HINTS.iter().any(|hint| text.contains(hint))),
            flow: thread.flow_snapshot_id.is_some(),
        }
    }

    /// Launches the enabled subtasks in parallel, each under its own
    /// deadline. A failed or timed-out subtask degrades to an empty
    /// result and a warning; the turn proceeds.
    async fn run_subtasks(
        &self,
        ctx: &RequestContext,
        thread: &ChatThread,
        cmd: &SendMessage,
        strategy: Strategy,
    ) -> SubtaskOutput {
        let retrieval_task = async {
            if !strategy.retrieve {
                return Ok(Vec::new());
            }
            let mut options =
                RetrievalOptions::new(&self.config.knowledge.default_embedding_model);
            options.threshold = self.config.knowledge.similarity_threshold;
            match tokio::time::timeout(
                RETRIEVE_DEADLINE,
                self.runtime.subtasks.run(self.retrieval.retrieve(
                    &ctx.tenant_id,
                    &cmd.content,
                    RetrievalMode::Hybrid,
                    &options,
                )),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AppError::ProviderTimeout(RETRIEVE_DEADLINE.as_millis() as u64)),
            }
        };

        let tools_task = async {
            if !strategy.tools || cmd.tool_invocations.is_empty() {
                return (Vec::new(), Vec::new());
            }
            match tokio::time::timeout(
                TOOLS_DEADLINE,
                self.runtime
                    .subtasks
                    .run(self.execute_tool_invocations(ctx, thread, cmd)),
            )
            .await
            {
                Ok(output) => output,
                Err(_) => (
                    Vec::new(),
                    vec![format!(
                        "tool subtask timed out after {}s",
                        TOOLS_DEADLINE.as_secs()
                    )],
                ),
            }
        };

        let flow_task = async {
            let Some(snapshot_id) = thread.flow_snapshot_id.as_deref().filter(|_| strategy.flow)
            else {
                return Ok(Vec::new());
            };
            match tokio::time::timeout(
                FLOW_DEADLINE,
                self.runtime
                    .subtasks
                    .run(self.flow.run(ctx, snapshot_id, &cmd.content)),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AppError::ProviderTimeout(FLOW_DEADLINE.as_millis() as u64)),
            }
        };

        let (retrieved, (tool_results, tool_warnings), flowed) =
            tokio::join!(retrieval_task, tools_task, flow_task);

        let mut warnings = tool_warnings;
        let hits = match retrieved {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "retrieval subtask failed; continuing without context");
                warnings.push(format!("knowledge retrieval unavailable: {err}"));
                Vec::new()
            }
        };
        let flow_context = match flowed {
            Ok(lines) => lines,
            Err(err) => {
                warn!(error = %err, "flow subtask failed; continuing without flow context");
                warnings.push(format!("flow execution unavailable: {err}"));
                Vec::new()
            }
        };

        SubtaskOutput {
            hits,
            tool_results,
            flow_context,
            warnings,
        }
    }

    /// Runs the message's explicit tool invocations in order. Individual
    /// failures become error-flagged records plus warnings.
    async fn execute_tool_invocations(
        &self,
        ctx: &RequestContext,
        thread: &ChatThread,
        cmd: &SendMessage,
    ) -> (Vec<ToolResultRecord>, Vec<String>) {
        let mut records = Vec::with_capacity(cmd.tool_invocations.len());
        let mut warnings = Vec::new();

        for invocation in &cmd.tool_invocations {
            match self
                .tools
                .execute(
                    ctx,
                    &invocation.tool_code,
                    Some(thread.id.clone()),
                    invocation.params.clone(),
                    None,
                )
                .await
            {
                Ok(result) => records.push(ToolResultRecord {
                    tool_code: result.tool_code,
                    content: result.content,
                    is_error: false,
                }),
                Err(err) => {
                    warn!(tool_code = %invocation.tool_code, error = %err, "tool invocation failed");
                    warnings.push(format!("tool {} failed: {err}", invocation.tool_code));
                    records.push(ToolResultRecord {
                        tool_code: invocation.tool_code.clone(),
                        content: err.to_string(),
                        is_error: true,
                    });
                }
            }
        }

        (records, warnings)
    }

    async fn build_context(
        &self,
        thread: &ChatThread,
        cmd: &SendMessage,
        subtasks: &SubtaskOutput,
    ) -> Result<CompletionContext, AppError> {
        let mut completion_ctx = CompletionContext::new(
            cmd.model.clone().unwrap_or_else(|| thread.default_model.clone()),
            cmd.temperature.unwrap_or(thread.temperature),
        );
        completion_ctx.max_tokens = cmd.max_tokens;
        completion_ctx.messages = self.history_messages(thread, chrono::Utc::now()).await?;
        completion_ctx.knowledge_context = subtasks
            .hits
            .iter()
            .map(|hit| hit.chunk.text.clone())
            .chain(subtasks.flow_context.iter().cloned())
            .collect();
        completion_ctx.tool_results = subtasks.tool_results.clone();
        Ok(completion_ctx)
    }

    /// Most recent turns of the thread, oldest first, cut off at `until`.
    async fn history_messages(
        &self,
        thread: &ChatThread,
        until: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<PromptMessage>, AppError> {
        let all = self.store.list_messages(&thread.id).await?;
        let window = self.config.chat.history_turns.saturating_mul(2);

        let eligible: Vec<&ChatMessage> = all
            .iter()
            .filter(|m| m.created_at <= until)
            .collect();
        let start = eligible.len().saturating_sub(window);

        Ok(eligible
            .into_iter()
            .skip(start)
            .map(|m| {
                let role = match m.role {
                    MessageRole::User => PromptRole::User,
                    MessageRole::Assistant => PromptRole::Assistant,
                    MessageRole::System => PromptRole::System,
                    MessageRole::Tool => PromptRole::Tool,
                };
                PromptMessage::new(role, m.content.clone())
            })
            .collect())
    }

    /// Persists the assistant message, its citations and the usage bucket
    /// as one transactional unit, then shapes the response. Usage is
    /// billed only here, for successfully generated turns.
    async fn finish_turn(
        &self,
        ctx: &RequestContext,
        thread: &ChatThread,
        model_used: &str,
        outcome: CompletionOutcome,
        subtasks: SubtaskOutput,
    ) -> Result<TurnResponse, AppError> {
        let mut message = ChatMessage::new(
            thread.id.clone(),
            ctx.tenant_id.clone(),
            ctx.user_id.clone(),
            MessageRole::Assistant,
            outcome.content.clone(),
        )
        .with_usage(outcome.tokens_in, outcome.tokens_out, outcome.latency_ms);

        if let Some(tool_call) = &outcome.tool_call {
            let params: TypedParams =
                serde_json::from_str(&tool_call.arguments_json).unwrap_or_default();
            message = message.with_tool_call(ToolCallPayload {
                tool_code: tool_call.tool_code.clone(),
                params,
                result: None,
            });
        }

        let citations: Vec<Citation> = subtasks
            .hits
            .iter()
            .map(|hit| {
                Citation::new(
                    message.id.clone(),
                    hit.chunk.id.clone(),
                    hit.score,
                    self.config.knowledge.default_embedding_model.clone(),
                )
            })
            .collect();

        let usage = TurnUsage {
            tenant_id: ctx.tenant_id.clone(),
            model_code: model_used.to_owned(),
            tokens_in: outcome.tokens_in,
            tokens_out: outcome.tokens_out,
            cost: outcome.cost,
        };

        self.store.save_turn(&message, &citations, &usage).await?;

        Ok(TurnResponse {
            message,
            citations,
            warnings: subtasks.warnings,
            substituted: outcome.substituted,
        })
    }
}

/// Adapts the provider chunk sink onto the turn's event sink. `complete`
/// is deliberately not forwarded: the orchestrator emits it only after
/// the turn is durably persisted.
struct ForwardingSink<'a> {
    inner: &'a mut dyn EventSink,
}

#[async_trait]
impl ChunkSink for ForwardingSink<'_> {
    async fn on_chunk(&mut self, delta: &str) {
        self.inner
            .emit(StreamEvent::Chunk {
                delta: delta.to_owned(),
            })
            .await;
    }

    async fn on_complete(&mut self, _outcome: &CompletionOutcome) {}

    async fn on_error(&mut self, error: &AppError) {
        self.inner
            .emit(StreamEvent::Error {
                message: error.to_string(),
            })
            .await;
    }
}
