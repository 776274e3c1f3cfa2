//! Builds the memory stack described by an [`AgenticConfig`].

use agentic_rs_config::{
    AgenticConfig, ConfigError, EmbeddingConfig, MemoryBackend, RemoteIndexConfig,
};
use agentic_rs_memory::{
    CharRatioCounter, EmbeddingError, EmbeddingProvider, LocalIndex, MemoryError, MemoryManager,
    MemorySettings, MemoryStore, OpenAiEmbeddingOptions, OpenAiEmbeddingProvider, RemoteIndex,
    RemoteIndexOptions, RetryPolicy, VectorIndex,
};
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while turning config into a running memory manager.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// Neither the inline key nor the named environment variable is set.
    #[error("missing api key for {service} (set {env})")]
    MissingApiKey { service: &'static str, env: String },
}

/// Ranking and context settings taken from config.
pub fn settings_from_config(config: &AgenticConfig) -> MemorySettings {
    MemorySettings {
        retrieval_count: config.memory.retrieval_count,
        dedup_threshold: config.memory.dedup_threshold,
        importance_weight: config.memory.importance_weight,
        candidate_multiplier: config.memory.candidate_multiplier,
        max_context_tokens: config.context.max_context_tokens,
        conversation_history_length: config.context.conversation_history_length,
    }
}

pub fn retry_policy(remote: &RemoteIndexConfig) -> RetryPolicy {
    RetryPolicy {
        max_attempts: remote.max_attempts,
        base_delay: Duration::from_millis(remote.base_delay_ms),
        max_delay: Duration::from_millis(remote.max_delay_ms),
        jitter_ratio: remote.jitter_ratio,
    }
}

/// Open the configured vector index backend.
pub fn index_from_config(config: &AgenticConfig) -> Result<Arc<dyn VectorIndex>, SetupError> {
    let memory = &config.memory;
    match memory.backend {
        MemoryBackend::Local => {
            let index = LocalIndex::open(&memory.path, memory.dimension)?;
            Ok(Arc::new(index))
        }
        MemoryBackend::Remote => {
            let remote = &memory.remote;
            let api_key = remote
                .resolve_api_key()
                .ok_or_else(|| SetupError::MissingApiKey {
                    service: "remote index",
                    env: remote.api_key_env.clone(),
                })?;
            let index = RemoteIndex::new(RemoteIndexOptions {
                endpoint: remote.endpoint.clone().unwrap_or_default(),
                api_key,
                namespace: remote.namespace.clone(),
                dimension: memory.dimension,
                timeout: Duration::from_millis(remote.timeout_ms),
                retry: retry_policy(remote),
            })?;
            Ok(Arc::new(index))
        }
    }
}

/// HTTP embedding provider for the configured model.
pub fn embedder_from_config(
    embedding: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, SetupError> {
    let api_key = embedding
        .resolve_api_key()
        .ok_or_else(|| SetupError::MissingApiKey {
            service: "embeddings",
            env: embedding.api_key_env.clone(),
        })?;
    let provider = OpenAiEmbeddingProvider::new(OpenAiEmbeddingOptions {
        endpoint: embedding.endpoint.clone(),
        model: embedding.model.clone(),
        api_key,
        dimensions: embedding.dimensions,
        timeout: Duration::from_millis(embedding.timeout_ms),
    })?;
    Ok(Arc::new(provider))
}

/// Validate `config`, open the store and index, and return a ready manager.
///
/// The record log always lives under `memory.path`, whichever backend holds
/// the vectors.
pub async fn open_memory(
    config: &AgenticConfig,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<MemoryManager, SetupError> {
    config.validate()?;
    let root = PathBuf::from(&config.memory.path);
    debug!(
        "opening memory (backend={:?}, path={})",
        config.memory.backend,
        root.display()
    );
    let index = index_from_config(config)?;
    let store = MemoryStore::open(&root, index).await?;
    let manager = MemoryManager::new(store, embedder, settings_from_config(config))
        .with_token_counter(Arc::new(CharRatioCounter::new(
            config.context.chars_per_token,
        )));
    info!("memory ready (path={})", root.display());
    Ok(manager)
}
