//! Configuration schema for the assistant memory subsystem.

use serde::{Deserialize, Serialize};

/// Root config for the agentic SDK.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AgenticConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

impl AgenticConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> AgenticConfigBuilder {
        AgenticConfigBuilder::new()
    }
}

/// Builder for assembling an `AgenticConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct AgenticConfigBuilder {
    config: AgenticConfig,
}

impl AgenticConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: AgenticConfig::default(),
        }
    }

    /// Replace the memory store configuration.
    pub fn memory(mut self, memory: MemoryConfig) -> Self {
        self.config.memory = memory;
        self
    }

    /// Replace the embedding provider configuration.
    pub fn embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.config.embedding = embedding;
        self
    }

    /// Replace the context assembly configuration.
    pub fn context(mut self, context: ContextConfig) -> Self {
        self.config.context = context;
        self
    }

    /// Finalize and return the built `AgenticConfig`.
    pub fn build(self) -> AgenticConfig {
        self.config
    }
}

/// Vector index backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    /// In-process index persisted under `memory.path`.
    #[default]
    Local,
    /// Managed vector service reached over HTTP.
    Remote,
}

/// Memory store and ranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: MemoryBackend,
    /// Directory for the record log and local vectors.
    #[serde(default = "default_memory_path")]
    pub path: String,
    /// Embedding dimension enforced on every write and query.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Default number of memories returned by a search.
    #[serde(default = "default_retrieval_count")]
    pub retrieval_count: usize,
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f32,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default)]
    pub remote: RemoteIndexConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::default(),
            path: default_memory_path(),
            dimension: default_dimension(),
            retrieval_count: default_retrieval_count(),
            dedup_threshold: default_dedup_threshold(),
            importance_weight: default_importance_weight(),
            candidate_multiplier: default_candidate_multiplier(),
            remote: RemoteIndexConfig::default(),
        }
    }
}

fn default_memory_path() -> String {
    "./data/memory".to_string()
}

fn default_dimension() -> usize {
    1536
}

fn default_retrieval_count() -> usize {
    5
}

fn default_dedup_threshold() -> f32 {
    0.98
}

fn default_importance_weight() -> f32 {
    0.1
}

fn default_candidate_multiplier() -> usize {
    3
}

/// Connection and retry settings for the remote vector service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteIndexConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Inline API key; prefer `api_key_env`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_remote_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Random jitter as a fraction of each delay.
    #[serde(default)]
    pub jitter_ratio: f64,
}

impl Default for RemoteIndexConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            api_key_env: default_remote_api_key_env(),
            namespace: None,
            timeout_ms: default_remote_timeout_ms(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: 0.0,
        }
    }
}

impl RemoteIndexConfig {
    /// Inline key if set, otherwise the value of `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_deref(), &self.api_key_env)
    }
}

fn default_remote_api_key_env() -> String {
    "PINECONE_API_KEY".to_string()
}

fn default_remote_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

/// OpenAI-compatible embedding endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,
    /// Output dimension requested from models that support truncation.
    #[serde(default)]
    pub dimensions: Option<usize>,
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            endpoint: default_embedding_endpoint(),
            api_key: None,
            api_key_env: default_embedding_api_key_env(),
            dimensions: None,
            timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

impl EmbeddingConfig {
    /// Inline key if set, otherwise the value of `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_deref(), &self.api_key_env)
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_embedding_timeout_ms() -> u64 {
    30_000
}

/// Context assembly budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextConfig {
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    /// Recent utterances kept in the conversation buffer.
    #[serde(default = "default_conversation_history_length")]
    pub conversation_history_length: usize,
    /// Characters per token for the default token estimate.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            conversation_history_length: default_conversation_history_length(),
            chars_per_token: default_chars_per_token(),
        }
    }
}

fn default_max_context_tokens() -> usize {
    2000
}

fn default_conversation_history_length() -> usize {
    10
}

fn default_chars_per_token() -> usize {
    4
}

fn resolve_key(inline: Option<&str>, env: &str) -> Option<String> {
    inline
        .map(str::to_string)
        .or_else(|| std::env::var(env).ok())
        .filter(|key| !key.trim().is_empty())
}
