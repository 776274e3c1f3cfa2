//! Typed memory façade: write paths per memory kind, ranked search, and
//! context retrieval over the conversation buffer.

use crate::context::{
    ContextAssembler, ContextPayload, ConversationBuffer, ConversationTurn, Speaker, TokenCounter,
};
use crate::embedding::EmbeddingProvider;
use crate::error::MemoryError;
use crate::filter::SearchFilter;
use crate::index::{IndexKind, check_dimension, cosine_similarity};
use crate::model::{MemoryRecord, MemoryType, Metadata, MetadataValue, NewMemory, ScoredRecord};
use crate::store::MemoryStore;
use log::{debug, info};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Tunables for ranking and context assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySettings {
    /// Default `k` for searches.
    pub retrieval_count: usize,
    /// Pairwise embedding similarity above which records count as duplicates.
    pub dedup_threshold: f32,
    /// Weight of importance added to similarity when ranking.
    pub importance_weight: f32,
    /// Candidates fetched per requested result before dedup.
    pub candidate_multiplier: usize,
    /// Token budget for assembled context.
    pub max_context_tokens: usize,
    /// Number of recent utterances kept for context.
    pub conversation_history_length: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            retrieval_count: 5,
            dedup_threshold: 0.98,
            importance_weight: 0.1,
            candidate_multiplier: 3,
            max_context_tokens: 2000,
            conversation_history_length: 10,
        }
    }
}

/// Snapshot of store contents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total: usize,
    pub by_type: BTreeMap<MemoryType, usize>,
    pub conversation_turns: usize,
    pub backend: IndexKind,
    pub indexed_vectors: usize,
}

/// Public entry point for storing and recalling memories.
pub struct MemoryManager {
    store: MemoryStore,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: MemorySettings,
    conversation: ConversationBuffer,
    assembler: ContextAssembler,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .field("conversation", &self.conversation)
            .field("assembler", &self.assembler)
            .finish()
    }
}

impl MemoryManager {
    pub fn new(
        store: MemoryStore,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: MemorySettings,
    ) -> Self {
        let conversation = ConversationBuffer::new(settings.conversation_history_length);
        let assembler = ContextAssembler::new(
            settings.max_context_tokens,
            settings.conversation_history_length,
        );
        info!(
            "initialized memory manager (backend={}, dimension={}, retrieval_count={})",
            store.index_kind(),
            store.dimension(),
            settings.retrieval_count
        );
        Self {
            store,
            embedder,
            settings,
            conversation,
            assembler,
        }
    }

    /// Use a custom token counter for context assembly.
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.assembler = self.assembler.with_counter(counter);
        self
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let embedding = self.embedder.embed(text).await?;
        check_dimension(self.store.dimension(), &embedding)?;
        Ok(embedding)
    }

    /// Store one exchange; both utterances join the conversation buffer only
    /// once the record is stored.
    pub async fn store_conversation(
        &self,
        user_message: &str,
        assistant_response: &str,
        mut metadata: Metadata,
    ) -> Result<MemoryRecord, MemoryError> {
        let content = format!("User: {user_message}\nAssistant: {assistant_response}");
        metadata.insert("user_message".to_string(), user_message.into());
        metadata.insert("assistant_response".to_string(), assistant_response.into());
        let embedding = self.embed(&content).await?;
        let record = self
            .store
            .put(
                NewMemory::new(MemoryType::Conversation, content, embedding)
                    .with_metadata(metadata),
            )
            .await?;
        self.push_turn(Speaker::User, user_message);
        self.push_turn(Speaker::Assistant, assistant_response);
        Ok(record)
    }

    pub async fn store_fact(
        &self,
        fact: &str,
        importance: Option<f32>,
        metadata: Metadata,
    ) -> Result<MemoryRecord, MemoryError> {
        self.store_memory(MemoryType::Fact, fact, importance, metadata)
            .await
    }

    pub async fn store_preference(
        &self,
        preference: &str,
        category: Option<&str>,
        mut metadata: Metadata,
    ) -> Result<MemoryRecord, MemoryError> {
        if let Some(category) = category {
            metadata.insert("category".to_string(), category.into());
        }
        self.store_memory(MemoryType::Preference, preference, None, metadata)
            .await
    }

    /// Store a note; the title, when given, is embedded with the body.
    pub async fn store_note(
        &self,
        note: &str,
        title: Option<&str>,
        tags: &[String],
        mut metadata: Metadata,
    ) -> Result<MemoryRecord, MemoryError> {
        let embed_text = match title {
            Some(title) => {
                metadata.insert("title".to_string(), title.into());
                format!("{title}: {note}")
            }
            None => note.to_string(),
        };
        if !tags.is_empty() {
            metadata.insert("tags".to_string(), tags.join(",").into());
        }
        let embedding = self.embed(&embed_text).await?;
        self.store
            .put(NewMemory::new(MemoryType::Note, note, embedding).with_metadata(metadata))
            .await
    }

    /// Store any kind of memory; used directly for tasks and context.
    pub async fn store_memory(
        &self,
        memory_type: MemoryType,
        content: &str,
        importance: Option<f32>,
        metadata: Metadata,
    ) -> Result<MemoryRecord, MemoryError> {
        let embedding = self.embed(content).await?;
        let mut memory = NewMemory::new(memory_type, content, embedding).with_metadata(metadata);
        memory.importance = importance;
        self.store.put(memory).await
    }

    pub fn get(&self, id: Uuid) -> Result<MemoryRecord, MemoryError> {
        self.store.get(id)
    }

    /// Soft-delete a memory so it no longer appears in searches.
    pub async fn forget(&self, id: Uuid) -> Result<MemoryRecord, MemoryError> {
        let record = self.store.soft_delete(id).await?;
        info!("forgot memory (id={id}, type={})", record.memory_type);
        Ok(record)
    }

    /// Semantic search with importance boost and near-duplicate removal.
    ///
    /// `k` falls back to the configured retrieval count.
    pub async fn search_memories(
        &self,
        query: &str,
        k: Option<usize>,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        let k = k.unwrap_or(self.settings.retrieval_count);
        if k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embed(query).await?;
        let fetch = k.saturating_mul(self.settings.candidate_multiplier.max(1));
        let candidates = self
            .store
            .query_by_vector(&embedding, fetch, filter)
            .await?;
        let fetched = candidates.len();
        let ranked = rank_candidates(
            candidates,
            k,
            self.settings.importance_weight,
            self.settings.dedup_threshold,
        );
        debug!(
            "searched memories (k={k}, candidates={fetched}, returned={})",
            ranked.len()
        );
        Ok(ranked)
    }

    /// Search, then merge results with recent conversation under the token budget.
    pub async fn retrieve_context(
        &self,
        query: &str,
        k: Option<usize>,
        filter: &SearchFilter,
    ) -> Result<ContextPayload, MemoryError> {
        let memories = self.search_memories(query, k, filter).await?;
        let turns = self.conversation.snapshot();
        let payload = self.assembler.assemble(&turns, &memories);
        debug!(
            "assembled context (fragments={}, tokens={}, dropped={})",
            payload.fragments.len(),
            payload.total_tokens,
            payload.dropped
        );
        Ok(payload)
    }

    /// Live records, oldest first; an empty slice exports every kind.
    pub fn export_memories(&self, memory_types: &[MemoryType]) -> Vec<MemoryRecord> {
        self.store.list(memory_types)
    }

    pub async fn stats(&self) -> Result<MemoryStats, MemoryError> {
        let by_type = self.store.counts();
        Ok(MemoryStats {
            total: by_type.values().sum(),
            by_type,
            conversation_turns: self.conversation.len(),
            backend: self.store.index_kind(),
            indexed_vectors: self.store.indexed_len().await?,
        })
    }

    /// Record an utterance in the conversation buffer without storing it.
    pub fn push_turn(&self, speaker: Speaker, text: &str) {
        self.conversation.push(ConversationTurn::new(speaker, text));
    }

    pub fn clear_conversation(&self) {
        self.conversation.clear();
    }

    /// Up to `limit` recent utterances, oldest first.
    pub fn recent_conversation(&self, limit: usize) -> Vec<ConversationTurn> {
        self.conversation.recent(limit)
    }

    pub async fn flush(&self) -> Result<(), MemoryError> {
        self.store.flush().await
    }

    /// Flush and release the store.
    pub async fn close(self) -> Result<(), MemoryError> {
        self.store.flush().await?;
        info!("closed memory manager");
        Ok(())
    }
}

/// Apply the importance boost, order deterministically, drop near-duplicates
/// and keep the best `k`.
pub fn rank_candidates(
    candidates: Vec<ScoredRecord>,
    k: usize,
    importance_weight: f32,
    dedup_threshold: f32,
) -> Vec<ScoredRecord> {
    let mut scored: Vec<ScoredRecord> = candidates
        .into_iter()
        .map(|mut candidate| {
            candidate.score = candidate.similarity + importance_weight * candidate.record.importance;
            candidate
        })
        .collect();
    scored.sort_by(compare_scored);

    let mut kept: Vec<ScoredRecord> = Vec::with_capacity(k);
    for candidate in scored {
        if kept.len() == k {
            break;
        }
        let duplicate = kept.iter().any(|existing| {
            cosine_similarity(&existing.record.embedding, &candidate.record.embedding)
                > dedup_threshold
        });
        if duplicate {
            debug!("dropped near-duplicate memory (id={})", candidate.record.id);
            continue;
        }
        kept.push(candidate);
    }
    kept
}

fn compare_scored(a: &ScoredRecord, b: &ScoredRecord) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.record.created_at.cmp(&a.record.created_at))
        .then_with(|| a.record.id.cmp(&b.record.id))
}

/// Metadata builder shorthand for callers.
pub fn build_metadata<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Metadata
where
    K: Into<String>,
    V: Into<MetadataValue>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}
