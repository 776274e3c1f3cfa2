//! Retrieval-augmented memory for a personal assistant.
//!
//! Records are embedded, persisted in a record log, indexed by a local or
//! remote vector index, and recalled by similarity into a token-bounded
//! context alongside recent conversation.

pub mod context;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod index;
pub mod manager;
pub mod model;
mod persist;
pub mod retry;
pub mod store;

/// Context assembly and conversation buffer.
pub use context::{
    CharRatioCounter, ContextAssembler, ContextFragment, ContextPayload, ConversationBuffer,
    ConversationTurn, FragmentSource, Speaker, TokenCounter,
};
/// Embedding provider interface and HTTP implementation.
pub use embedding::{EmbeddingProvider, OpenAiEmbeddingOptions, OpenAiEmbeddingProvider};
/// Memory error types.
pub use error::{EmbeddingError, MemoryError};
/// Search filters.
pub use filter::{MetadataCondition, MetadataFilter, SearchFilter};
/// Vector index contract and backends.
pub use index::{
    IndexHit, IndexKind, IndexPayload, LocalIndex, RemoteIndex, RemoteIndexOptions, VectorIndex,
};
/// Typed memory façade.
pub use manager::{MemoryManager, MemorySettings, MemoryStats, build_metadata, rank_candidates};
/// Memory record model.
pub use model::{MemoryRecord, MemoryType, Metadata, MetadataValue, NewMemory, ScoredRecord};
/// Retry schedule for remote calls.
pub use retry::RetryPolicy;
/// Durable record table.
pub use store::MemoryStore;
