use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Strategy used when balancing across healthy providers.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BalancingStrategy {
    #[default]
    RoundRobin,
    Random,
    Weighted,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

/// Knowledge-base group: document limits, chunking and search defaults.
#[derive(Clone, Deserialize, Debug)]
pub struct KnowledgeConfig {
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
    #[serde(default = "default_chunk_target_tokens")]
    pub chunk_target_tokens: usize,
    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_tokens: usize,
    #[serde(default = "default_chunk_overlap_tokens")]
    pub chunk_overlap_tokens: usize,
    #[serde(default = "default_sync_chunk_limit")]
    pub sync_chunk_limit: usize,
    #[serde(default = "default_sync_content_limit")]
    pub sync_content_limit: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_embedding_model")]
    pub default_embedding_model: String,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    #[serde(default = "default_top_k_max")]
    pub top_k_max: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

/// Chat group: admission limits and model defaults.
#[derive(Clone, Deserialize, Debug)]
pub struct ChatConfig {
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    #[serde(default = "default_max_prompt_tokens")]
    pub max_prompt_tokens: usize,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_rate_limit_max_messages")]
    pub rate_limit_max_messages: u64,
    #[serde(default = "default_chat_model")]
    pub default_model: String,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

/// Tool execution group.
#[derive(Clone, Deserialize, Debug)]
pub struct ToolsConfig {
    #[serde(default = "default_tool_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_tool_max_timeout_secs")]
    pub max_timeout_secs: u64,
    #[serde(default = "default_tool_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_tool_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_tool_quota")]
    pub default_quota: u64,
    #[serde(default = "default_tool_rate_limit")]
    pub rate_limit_per_minute: usize,
    #[serde(default)]
    pub sandbox_enabled: bool,
}

/// Security group. Consumed by the external auth surface; carried here so
/// one configuration source feeds the whole deployment.
#[derive(Clone, Deserialize, Debug)]
pub struct SecurityConfig {
    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,
    #[serde(default = "default_access_token_ttl_secs")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_refresh_token_ttl_secs")]
    pub refresh_token_ttl_secs: u64,
    #[serde(default = "default_lockout_threshold")]
    pub failed_attempt_lockout: u32,
    #[serde(default = "default_password_history")]
    pub password_history_depth: u32,
}

/// LLM provider group.
#[derive(Clone, Deserialize, Debug, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default = "default_failover_enabled")]
    pub failover_enabled: bool,
    #[serde(default = "default_balancing")]
    pub balancing: BalancingStrategy,
}

/// One configured completion/embedding provider.
#[derive(Clone, Deserialize, Debug)]
pub struct ProviderConfig {
    pub name: String,
    /// Model-name prefixes routed to this provider, e.g. `gpt-`.
    pub prefixes: Vec<String>,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub models: Vec<String>,
    pub default_model: String,
    #[serde(default = "default_provider_weight")]
    pub weight: u32,
    #[serde(default = "default_provider_enabled")]
    pub enabled: bool,
}

fn default_max_document_bytes() -> usize {
    10_000_000
}
fn default_chunk_target_tokens() -> usize {
    500
}
fn default_chunk_max_tokens() -> usize {
    1000
}
fn default_chunk_overlap_tokens() -> usize {
    50
}
fn default_sync_chunk_limit() -> usize {
    50
}
fn default_sync_content_limit() -> usize {
    50_000
}
fn default_embedding_batch_size() -> usize {
    32
}
fn default_embedding_model() -> String {
    "embed-small".to_string()
}
fn default_embedding_dimension() -> usize {
    1536
}
fn default_top_k_max() -> usize {
    50
}
fn default_similarity_threshold() -> f32 {
    0.3
}
fn default_max_message_chars() -> usize {
    32_000
}
fn default_max_prompt_tokens() -> usize {
    16_000
}
fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_rate_limit_max_messages() -> u64 {
    60
}
fn default_chat_model() -> String {
    "gpt-x".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_history_turns() -> usize {
    20
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_tool_max_timeout_secs() -> u64 {
    300
}
fn default_tool_retry_count() -> u32 {
    3
}
fn default_tool_retry_interval_ms() -> u64 {
    1000
}
fn default_tool_quota() -> u64 {
    1000
}
fn default_tool_rate_limit() -> usize {
    100
}
fn default_jwt_algorithm() -> String {
    "RS256".to_string()
}
fn default_access_token_ttl_secs() -> u64 {
    900
}
fn default_refresh_token_ttl_secs() -> u64 {
    1_209_600
}
fn default_lockout_threshold() -> u32 {
    5
}
fn default_password_history() -> u32 {
    5
}
fn default_failover_enabled() -> bool {
    true
}
fn default_balancing() -> BalancingStrategy {
    BalancingStrategy::RoundRobin
}
fn default_provider_weight() -> u32 {
    1
}
fn default_provider_enabled() -> bool {
    true
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            max_document_bytes: default_max_document_bytes(),
            chunk_target_tokens: default_chunk_target_tokens(),
            chunk_max_tokens: default_chunk_max_tokens(),
            chunk_overlap_tokens: default_chunk_overlap_tokens(),
            sync_chunk_limit: default_sync_chunk_limit(),
            sync_content_limit: default_sync_content_limit(),
            embedding_batch_size: default_embedding_batch_size(),
            default_embedding_model: default_embedding_model(),
            embedding_dimension: default_embedding_dimension(),
            top_k_max: default_top_k_max(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
            max_prompt_tokens: default_max_prompt_tokens(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            rate_limit_max_messages: default_rate_limit_max_messages(),
            default_model: default_chat_model(),
            default_temperature: default_temperature(),
            history_turns: default_history_turns(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_tool_timeout_secs(),
            max_timeout_secs: default_tool_max_timeout_secs(),
            retry_count: default_tool_retry_count(),
            retry_interval_ms: default_tool_retry_interval_ms(),
            default_quota: default_tool_quota(),
            rate_limit_per_minute: default_tool_rate_limit(),
            sandbox_enabled: false,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_algorithm: default_jwt_algorithm(),
            access_token_ttl_secs: default_access_token_ttl_secs(),
            refresh_token_ttl_secs: default_refresh_token_ttl_secs(),
            failed_attempt_lockout: default_lockout_threshold(),
            password_history_depth: default_password_history(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
impl AppConfig {
    /// Configuration suitable for tests: in-memory database, defaults
    /// everywhere else.
    pub fn for_tests() -> Self {
        Self {
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "test_ns".into(),
            surrealdb_database: "test_db".into(),
            http_port: 0,
            knowledge: KnowledgeConfig::default(),
            chat: ChatConfig::default(),
            tools: ToolsConfig::default(),
            security: SecurityConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = AppConfig::for_tests();

        assert_eq!(config.knowledge.chunk_target_tokens, 500);
        assert_eq!(config.knowledge.chunk_max_tokens, 1000);
        assert_eq!(config.knowledge.chunk_overlap_tokens, 50);
        assert_eq!(config.knowledge.sync_chunk_limit, 50);
        assert_eq!(config.knowledge.sync_content_limit, 50_000);
        assert_eq!(config.knowledge.embedding_batch_size, 32);
        assert_eq!(config.chat.max_message_chars, 32_000);
        assert_eq!(config.chat.rate_limit_window_secs, 60);
        assert_eq!(config.chat.rate_limit_max_messages, 60);
        assert_eq!(config.chat.history_turns, 20);
        assert_eq!(config.tools.rate_limit_per_minute, 100);
        assert!(config.llm.failover_enabled);
        assert_eq!(config.llm.balancing, BalancingStrategy::RoundRobin);
    }
}
