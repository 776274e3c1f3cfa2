use agentic_rs_memory::{EmbeddingError, EmbeddingProvider};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Deterministic bag-of-words embedder: each lowercase word adds 1.0 to the
/// bucket chosen by its FNV-1a hash. Texts sharing words score as similar.
#[derive(Debug, Clone)]
pub struct KeywordEmbedder {
    dimension: usize,
}

impl KeywordEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Synchronous embedding, handy when building fixtures.
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        for word in text
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let bucket = (fnv1a(&word.to_lowercase()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        vector
    }
}

fn fnv1a(word: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vector(text))
    }
}

/// Returns the same vector for every input and records what it saw.
#[derive(Debug, Clone)]
pub struct FixedEmbedder {
    embedding: Vec<f32>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl FixedEmbedder {
    pub fn new(embedding: Vec<f32>) -> Self {
        Self {
            embedding,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.seen.lock().push(text.to_string());
        Ok(self.embedding.clone())
    }
}

#[derive(Debug, Clone)]
pub struct FailingEmbedder {
    message: String,
}

impl FailingEmbedder {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Api(self.message.clone()))
    }
}
