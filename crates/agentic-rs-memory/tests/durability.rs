//! Write atomicity, failure propagation and restart behaviour.

use agentic_rs_memory::{
    LocalIndex, MemoryError, MemoryManager, MemorySettings, MemoryStore, MemoryType, Metadata,
    NewMemory, SearchFilter, VectorIndex,
};
use agentic_rs_test_utils::{FailingEmbedder, FaultyIndex, FixedEmbedder, KeywordEmbedder};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const DIMENSION: usize = 64;

async fn faulty_manager(root: &Path) -> (MemoryManager, Arc<FaultyIndex>) {
    let local: Arc<dyn VectorIndex> = Arc::new(LocalIndex::open(root, DIMENSION).expect("index"));
    let index = Arc::new(FaultyIndex::new(local));
    let store = MemoryStore::open(root, index.clone()).await.expect("store");
    let manager = MemoryManager::new(
        store,
        Arc::new(KeywordEmbedder::new(DIMENSION)),
        MemorySettings::default(),
    );
    (manager, index)
}

async fn reopen(root: &Path) -> MemoryManager {
    let index = LocalIndex::open(root, DIMENSION).expect("index");
    let store = MemoryStore::open(root, Arc::new(index))
        .await
        .expect("store");
    MemoryManager::new(
        store,
        Arc::new(KeywordEmbedder::new(DIMENSION)),
        MemorySettings::default(),
    )
}

/// A failed index write leaves no record behind, now or after restart.
#[tokio::test]
async fn index_failure_rolls_back_record() {
    let temp = tempdir().expect("tempdir");
    let (manager, index) = faulty_manager(temp.path()).await;
    index.fail_upserts(true);
    let err = manager
        .store_fact("User has daughter named Sarah", None, Metadata::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::IndexUnavailable(_)));
    assert_eq!(index.upsert_attempts(), 1);
    assert!(manager.export_memories(&[]).is_empty());

    index.fail_upserts(false);
    let kept = manager
        .store_fact("User's dog is named Max", None, Metadata::new())
        .await
        .expect("fact");
    manager.close().await.expect("close");

    let reopened = reopen(temp.path()).await;
    let records = reopened.export_memories(&[]);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, kept.id);
}

/// Search failures surface as errors rather than empty results.
#[tokio::test]
async fn index_failure_is_not_masked_as_empty_context() {
    let temp = tempdir().expect("tempdir");
    let (manager, index) = faulty_manager(temp.path()).await;
    manager
        .store_fact("Prefers window seats", None, Metadata::new())
        .await
        .expect("fact");
    index.fail_searches(true);
    let err = manager
        .retrieve_context("seats", None, &SearchFilter::any())
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn embedding_failure_fails_closed() {
    let temp = tempdir().expect("tempdir");
    let index = LocalIndex::open(temp.path(), DIMENSION).expect("index");
    let store = MemoryStore::open(temp.path(), Arc::new(index))
        .await
        .expect("store");
    let manager = MemoryManager::new(
        store,
        Arc::new(FailingEmbedder::new("quota exceeded")),
        MemorySettings::default(),
    );
    let err = manager
        .store_note("note", Some("title"), &[], Metadata::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::EmbeddingUnavailable(ref msg) if msg.contains("quota")));
    assert_eq!(manager.stats().await.expect("stats").total, 0);

    let err = manager
        .store_conversation("Hi", "Hello!", Metadata::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::EmbeddingUnavailable(_)));
    assert!(manager.recent_conversation(10).is_empty());
    let stats = manager.stats().await.expect("stats");
    assert_eq!(stats.total, 0);
    assert_eq!(stats.conversation_turns, 0);
}

#[tokio::test]
async fn embedder_with_wrong_dimension_is_rejected() {
    let temp = tempdir().expect("tempdir");
    let index = LocalIndex::open(temp.path(), DIMENSION).expect("index");
    let store = MemoryStore::open(temp.path(), Arc::new(index))
        .await
        .expect("store");
    let embedder = Arc::new(FixedEmbedder::new(vec![1.0; DIMENSION + 1]));
    let manager = MemoryManager::new(store, embedder.clone(), MemorySettings::default());
    let err = manager
        .store_fact("anything", None, Metadata::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::DimensionMismatch { .. }));
    assert!(err.is_fatal());
    assert_eq!(embedder.seen(), vec!["anything".to_string()]);
}

/// Restart reproduces identical search results from persisted state.
#[tokio::test]
async fn restart_restores_identical_search_results() {
    let temp = tempdir().expect("tempdir");
    let query = "coffee in the morning";
    let before = {
        let manager = reopen(temp.path()).await;
        for text in [
            "Drinks coffee every morning",
            "Morning run before work",
            "Coffee beans from the market",
            "Evening tea ritual",
        ] {
            manager
                .store_fact(text, None, Metadata::new())
                .await
                .expect("fact");
        }
        let results = manager
            .search_memories(query, Some(3), &SearchFilter::any())
            .await
            .expect("search");
        manager.close().await.expect("close");
        results
    };

    let manager = reopen(temp.path()).await;
    let after = manager
        .search_memories(query, Some(3), &SearchFilter::any())
        .await
        .expect("search");
    assert_eq!(after, before);
}

#[tokio::test]
async fn round_trip_preserves_every_field() {
    let temp = tempdir().expect("tempdir");
    let index = LocalIndex::open(temp.path(), 2).expect("index");
    let store = MemoryStore::open(temp.path(), Arc::new(index))
        .await
        .expect("store");
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), "voice".into());
    metadata.insert("turn".to_string(), 7_i64.into());
    let stored = store
        .put(
            NewMemory::new(MemoryType::Context, "At the office", vec![0.25, -0.5])
                .with_importance(0.45)
                .with_metadata(metadata.clone()),
        )
        .await
        .expect("put");

    let loaded = store.get(stored.id).expect("get");
    assert_eq!(loaded.content, "At the office");
    assert_eq!(loaded.memory_type, MemoryType::Context);
    assert_eq!(loaded.embedding, vec![0.25, -0.5]);
    assert_eq!(loaded.importance, 0.45);
    assert_eq!(loaded.metadata, metadata);
    assert_eq!(loaded, stored);
}

#[tokio::test]
async fn dimension_mismatch_on_reopen_refuses_to_start() {
    let temp = tempdir().expect("tempdir");
    {
        let manager = reopen(temp.path()).await;
        manager
            .store_fact("persisted", None, Metadata::new())
            .await
            .expect("fact");
        manager.close().await.expect("close");
    }
    let err = LocalIndex::open(temp.path(), DIMENSION * 2).unwrap_err();
    assert!(err.is_fatal());
}

/// A write rejected for unserializable metadata leaves the store loadable.
#[tokio::test]
async fn non_finite_metadata_does_not_poison_restart() {
    let temp = tempdir().expect("tempdir");
    let (manager, _) = faulty_manager(temp.path()).await;
    let kept = manager
        .store_fact("User likes tea", None, Metadata::new())
        .await
        .expect("fact");
    let mut metadata = Metadata::new();
    metadata.insert("score".to_string(), f64::NAN.into());
    let err = manager
        .store_fact("User likes coffee", None, metadata)
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::InvalidRecord(_)));
    manager.close().await.expect("close");

    let reopened = reopen(temp.path()).await;
    let records = reopened.export_memories(&[]);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, kept.id);
}

/// Parallel writers and readers on one store lose nothing and rank stably.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_puts_and_searches_are_consistent() {
    let temp = tempdir().expect("tempdir");
    let index = LocalIndex::open(temp.path(), DIMENSION).expect("index");
    let store = Arc::new(
        MemoryStore::open(temp.path(), Arc::new(index))
            .await
            .expect("store"),
    );
    let embedder = KeywordEmbedder::new(DIMENSION);
    let query = embedder.vector("tea garden walk");

    let mut tasks = Vec::new();
    for writer in 0..8 {
        let store = store.clone();
        let embedder = embedder.clone();
        tasks.push(tokio::spawn(async move {
            for n in 0..5 {
                let content = format!("writer {writer} note {n} about tea garden");
                let memory = NewMemory::new(MemoryType::Note, &content, embedder.vector(&content));
                store.put(memory).await.expect("put");
            }
        }));
    }
    for _ in 0..4 {
        let store = store.clone();
        let query = query.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                store
                    .query_by_vector(&query, 5, &SearchFilter::any())
                    .await
                    .expect("search");
            }
        }));
    }
    for task in tasks {
        task.await.expect("task");
    }

    assert_eq!(store.list(&[]).len(), 40);
    assert_eq!(store.indexed_len().await.expect("len"), 40);

    let ids = |hits: Vec<agentic_rs_memory::ScoredRecord>| {
        hits.into_iter().map(|hit| hit.record.id).collect::<Vec<_>>()
    };
    let first = ids(store
        .query_by_vector(&query, 10, &SearchFilter::any())
        .await
        .expect("search"));
    assert_eq!(first.len(), 10);
    for _ in 0..5 {
        let again = ids(store
            .query_by_vector(&query, 10, &SearchFilter::any())
            .await
            .expect("search"));
        assert_eq!(again, first);
    }
}
