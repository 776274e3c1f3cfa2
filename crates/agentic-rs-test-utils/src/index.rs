use agentic_rs_memory::{
    IndexHit, IndexKind, IndexPayload, MemoryError, SearchFilter, VectorIndex,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

/// Wraps a real index and fails selected operations on demand with
/// `IndexUnavailable`.
pub struct FaultyIndex {
    inner: Arc<dyn VectorIndex>,
    fail_upserts: AtomicBool,
    fail_searches: AtomicBool,
    upserts: AtomicUsize,
}

impl FaultyIndex {
    pub fn new(inner: Arc<dyn VectorIndex>) -> Self {
        Self {
            inner,
            fail_upserts: AtomicBool::new(false),
            fail_searches: AtomicBool::new(false),
            upserts: AtomicUsize::new(0),
        }
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_searches(&self, fail: bool) {
        self.fail_searches.store(fail, Ordering::SeqCst);
    }

    /// Upsert attempts seen, including failed ones.
    pub fn upsert_attempts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for FaultyIndex {
    fn kind(&self) -> IndexKind {
        self.inner.kind()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn upsert(
        &self,
        id: Uuid,
        embedding: &[f32],
        payload: IndexPayload,
    ) -> Result<(), MemoryError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(MemoryError::IndexUnavailable("injected upsert failure".to_string()));
        }
        self.inner.upsert(id, embedding, payload).await
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<IndexHit>, MemoryError> {
        if self.fail_searches.load(Ordering::SeqCst) {
            return Err(MemoryError::IndexUnavailable("injected search failure".to_string()));
        }
        self.inner.search(query, k, filter).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), MemoryError> {
        self.inner.delete(id).await
    }

    async fn len(&self) -> Result<usize, MemoryError> {
        self.inner.len().await
    }

    async fn flush(&self) -> Result<(), MemoryError> {
        self.inner.flush().await
    }
}
