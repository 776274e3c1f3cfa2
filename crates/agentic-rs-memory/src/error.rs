//! Error types for memory operations.

use std::path::PathBuf;
use uuid::Uuid;

/// Errors returned by vector indexes, the memory store, and the manager.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Embedding length differs from the configured dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// Record id already exists in the store or index.
    #[error("duplicate id: {0}")]
    DuplicateId(Uuid),
    /// Record id is unknown.
    #[error("memory not found: {0}")]
    NotFound(Uuid),
    /// Remote index could not be reached after retries.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),
    /// Embedding provider failed.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),
    /// Persisted state on disk could not be loaded.
    #[error("corrupt persisted state at {path}: {reason}")]
    CorruptPersistedState { path: PathBuf, reason: String },
    /// Record failed validation before being written.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MemoryError {
    /// Whether the caller may retry later and should degrade rather than fail.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::IndexUnavailable(_) | Self::EmbeddingUnavailable(_)
        )
    }

    /// Whether the error indicates misconfiguration or unusable state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::CorruptPersistedState { .. }
        )
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CorruptPersistedState {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors returned by embedding providers.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// Provider API returned an error.
    #[error("api error: {0}")]
    Api(String),
    /// Provider rate limited the request.
    #[error("rate limited")]
    RateLimited,
    /// Request did not reach the provider.
    #[error("transport error: {0}")]
    Transport(String),
    /// Provider is not configured.
    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl From<EmbeddingError> for MemoryError {
    fn from(err: EmbeddingError) -> Self {
        MemoryError::EmbeddingUnavailable(err.to_string())
    }
}
