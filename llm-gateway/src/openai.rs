use std::time::Instant;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use common::{error::AppError, utils::text::estimate_tokens};

use crate::{
    backend::{l2_normalize, ChatBackend, EmbeddingBackend},
    types::{ChunkSink, CompletionContext, CompletionOutcome, PromptRole, ToolCallRequest},
};

/// Backend over any OpenAI-compatible HTTP endpoint. One instance serves
/// both chat completions and embeddings for a configured provider.
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    embedding_dimension: usize,
    cost_per_1k_tokens: f64,
}

impl OpenAiBackend {
    pub fn new(api_key: &str, base_url: &str, embedding_dimension: usize) -> Self {
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(base_url),
        );
        Self {
            client,
            embedding_dimension,
            cost_per_1k_tokens: 0.0,
        }
    }

    pub fn with_cost_per_1k_tokens(mut self, rate: f64) -> Self {
        self.cost_per_1k_tokens = rate;
        self
    }

    fn cost_for(&self, tokens_in: u32, tokens_out: u32) -> f64 {
        f64::from(tokens_in.saturating_add(tokens_out)) / 1000.0 * self.cost_per_1k_tokens
    }

    fn build_request(ctx: &CompletionContext) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();

        if let Some(preamble) = ctx.context_preamble() {
            messages.push(ChatCompletionRequestSystemMessage::from(preamble).into());
        }

        for message in &ctx.messages {
            let rendered = match message.role {
                PromptRole::System => {
                    ChatCompletionRequestSystemMessage::from(message.content.clone()).into()
                }
                PromptRole::User | PromptRole::Tool => {
                    ChatCompletionRequestUserMessage::from(message.content.clone()).into()
                }
                PromptRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(message.content.clone())
                    .build()?
                    .into(),
            };
            messages.push(rendered);
        }

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&ctx.model)
            .temperature(ctx.temperature)
            .messages(messages);
        if let Some(max_tokens) = ctx.max_tokens {
            builder.max_tokens(max_tokens);
        }
        builder.build()
    }
}

fn map_provider_error(err: OpenAIError, elapsed_ms: u64) -> AppError {
    match err {
        OpenAIError::Reqwest(inner) if inner.is_timeout() => AppError::ProviderTimeout(elapsed_ms),
        OpenAIError::Reqwest(inner) if inner.is_connect() => {
            AppError::ProviderUnavailable(inner.to_string())
        }
        other => AppError::ProviderError(other.to_string()),
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(&self, ctx: &CompletionContext) -> Result<CompletionOutcome, AppError> {
        let request = Self::build_request(ctx).map_err(AppError::OpenAI)?;
        let started = Instant::now();

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|err| map_provider_error(err, started.elapsed().as_millis() as u64))?;

        let latency_ms = started.elapsed().as_millis() as u64;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ProviderError("completion had no choices".into()))?;

        let content = choice.message.content.unwrap_or_default();
        let tool_call = choice
            .message
            .tool_calls
            .and_then(|calls| calls.into_iter().next())
            .map(|call| ToolCallRequest {
                tool_code: call.function.name,
                arguments_json: call.function.arguments,
            });

        let (tokens_in, tokens_out) = match response.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => (
                ctx.messages
                    .iter()
                    .map(|m| estimate_tokens(&m.content))
                    .sum::<usize>() as u32,
                estimate_tokens(&content) as u32,
            ),
        };

        Ok(CompletionOutcome {
            cost: self.cost_for(tokens_in, tokens_out),
            content,
            tool_call,
            tokens_in,
            tokens_out,
            latency_ms,
            substituted: false,
        })
    }

    async fn stream(
        &self,
        ctx: &CompletionContext,
        sink: &mut dyn ChunkSink,
    ) -> Result<CompletionOutcome, AppError> {
        let request = Self::build_request(ctx).map_err(AppError::OpenAI)?;
        let started = Instant::now();

        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|err| map_provider_error(err, started.elapsed().as_millis() as u64))?;

        let mut content = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    let delta = chunk
                        .choices
                        .first()
                        .and_then(|choice| choice.delta.content.clone())
                        .unwrap_or_default();
                    if !delta.is_empty() {
                        content.push_str(&delta);
                        sink.on_chunk(&delta).await;
                    }
                }
                Err(err) => {
                    let error =
                        map_provider_error(err, started.elapsed().as_millis() as u64);
                    warn!(error = %error, "provider stream failed mid-flight");
                    sink.on_error(&error).await;
                    return Err(error);
                }
            }
        }

        let tokens_in = ctx
            .messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum::<usize>() as u32;
        let tokens_out = estimate_tokens(&content) as u32;

        let outcome = CompletionOutcome {
            cost: self.cost_for(tokens_in, tokens_out),
            content,
            tool_call: None,
            tokens_in,
            tokens_out,
            latency_ms: started.elapsed().as_millis() as u64,
            substituted: false,
        };
        sink.on_complete(&outcome).await;
        Ok(outcome)
    }

    async fn is_healthy(&self) -> bool {
        match self.client.models().list().await {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "provider health probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiBackend {
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .dimensions(self.embedding_dimension as u32)
            .input([text])
            .build()?;

        let started = Instant::now();
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|err| map_provider_error(err, started.elapsed().as_millis() as u64))?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ProviderError("no embedding data received".into()))?
            .embedding;

        Ok(l2_normalize(embedding))
    }

    async fn is_available(&self, model: &str) -> bool {
        let _ = model;
        ChatBackend::is_healthy(self).await
    }

    fn dimension(&self, _model: &str) -> usize {
        self.embedding_dimension
    }
}
