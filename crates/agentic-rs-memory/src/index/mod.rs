//! Vector index contract and shared similarity helpers.
//!
//! Two backends implement [`VectorIndex`]: [`LocalIndex`] keeps every vector
//! resident and persists to disk on each mutation, [`RemoteIndex`] delegates
//! storage and search to a managed vector service over HTTP.

use crate::error::MemoryError;
use crate::filter::SearchFilter;
use crate::model::{MemoryRecord, MemoryType, Metadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

pub mod local;
pub mod remote;

pub use local::LocalIndex;
pub use remote::{RemoteIndex, RemoteIndexOptions};

/// Backend variant behind a [`VectorIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Local,
    Remote,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Local => f.write_str("local"),
            IndexKind::Remote => f.write_str("remote"),
        }
    }
}

/// Filterable projection of a record stored next to its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPayload {
    /// Memory kind.
    pub memory_type: MemoryType,
    /// Creation time, used for tie-breaking.
    pub created_at: DateTime<Utc>,
    /// Record metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl From<&MemoryRecord> for IndexPayload {
    fn from(record: &MemoryRecord) -> Self {
        Self {
            memory_type: record.memory_type,
            created_at: record.created_at,
            metadata: record.metadata.clone(),
        }
    }
}

/// Single ranked search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    /// Record id.
    pub id: Uuid,
    /// Cosine similarity in `[-1, 1]`, higher is better.
    pub score: f32,
    /// Creation time of the record.
    pub created_at: DateTime<Utc>,
}

/// Nearest-neighbour index over `(id, embedding, payload)` entries.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend variant.
    fn kind(&self) -> IndexKind;

    /// Configured embedding dimension.
    fn dimension(&self) -> usize;

    /// Insert a new entry; fails on wrong dimension or an existing id.
    async fn upsert(
        &self,
        id: Uuid,
        embedding: &[f32],
        payload: IndexPayload,
    ) -> Result<(), MemoryError>;

    /// Return up to `k` entries passing `filter`, ranked by similarity.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<IndexHit>, MemoryError>;

    /// Remove an entry; absent ids are not an error.
    async fn delete(&self, id: Uuid) -> Result<(), MemoryError>;

    /// Number of indexed entries.
    async fn len(&self) -> Result<usize, MemoryError>;

    /// Persist in-memory state, if the backend keeps any.
    async fn flush(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}

/// Fail with `DimensionMismatch` unless `embedding` has `expected` entries.
pub fn check_dimension(expected: usize, embedding: &[f32]) -> Result<(), MemoryError> {
    if embedding.len() != expected {
        return Err(MemoryError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(())
}

/// Cosine similarity; zero-norm vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Deterministic hit order: score desc, then newest first, then id.
pub fn compare_hits(a: &IndexHit, b: &IndexHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}
