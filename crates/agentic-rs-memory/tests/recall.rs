//! Ranked recall and context assembly through the memory manager.

use agentic_rs_memory::{
    LocalIndex, MemoryManager, MemorySettings, MemoryStore, MemoryType, Metadata, SearchFilter,
    Speaker, build_metadata,
};
use agentic_rs_test_utils::KeywordEmbedder;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const DIMENSION: usize = 64;

async fn open_manager(root: &Path, settings: MemorySettings) -> MemoryManager {
    let index = LocalIndex::open(root, DIMENSION).expect("index");
    let store = MemoryStore::open(root, Arc::new(index))
        .await
        .expect("store");
    MemoryManager::new(store, Arc::new(KeywordEmbedder::new(DIMENSION)), settings)
}

/// A type-filtered search returns the matching fact and never conversation.
#[tokio::test]
async fn daughter_query_finds_sarah_fact() {
    let temp = tempdir().expect("tempdir");
    let manager = open_manager(temp.path(), MemorySettings::default()).await;
    let sarah = manager
        .store_fact("User has daughter named Sarah", None, Metadata::new())
        .await
        .expect("sarah");
    manager
        .store_fact("User's dog is named Max", None, Metadata::new())
        .await
        .expect("max");
    manager
        .store_conversation("Hi", "Hello!", Metadata::new())
        .await
        .expect("conversation");

    let results = manager
        .search_memories("daughter", Some(2), &SearchFilter::types([MemoryType::Fact]))
        .await
        .expect("search");
    assert!(!results.is_empty() && results.len() <= 2);
    assert_eq!(results[0].record.id, sarah.id);
    assert!(
        results
            .iter()
            .all(|result| result.record.memory_type == MemoryType::Fact)
    );
}

#[tokio::test]
async fn repeated_fact_keeps_only_highest_scoring_copy() {
    let temp = tempdir().expect("tempdir");
    let manager = open_manager(temp.path(), MemorySettings::default()).await;
    manager
        .store_fact("User likes green tea", Some(0.5), Metadata::new())
        .await
        .expect("low");
    let high = manager
        .store_fact("user likes GREEN tea!", Some(0.9), Metadata::new())
        .await
        .expect("high");
    let sarah = manager
        .store_fact("User has daughter named Sarah", None, Metadata::new())
        .await
        .expect("sarah");

    let results = manager
        .search_memories("green tea", Some(2), &SearchFilter::any())
        .await
        .expect("search");
    let ids: Vec<_> = results.iter().map(|result| result.record.id).collect();
    assert_eq!(ids, vec![high.id, sarah.id]);
}

#[tokio::test]
async fn type_and_metadata_filters_hold_for_every_result() {
    let temp = tempdir().expect("tempdir");
    let manager = open_manager(temp.path(), MemorySettings::default()).await;
    for (n, category) in ["family", "work", "family"].into_iter().enumerate() {
        manager
            .store_fact(
                &format!("tea fact number {n}"),
                None,
                build_metadata([("category", category)]),
            )
            .await
            .expect("fact");
    }
    manager
        .store_preference("tea with milk", Some("family"), Metadata::new())
        .await
        .expect("preference");
    manager
        .store_conversation("tea?", "tea!", Metadata::new())
        .await
        .expect("conversation");

    let facts = manager
        .search_memories("tea", Some(10), &SearchFilter::types([MemoryType::Fact]))
        .await
        .expect("facts");
    assert_eq!(facts.len(), 3);
    assert!(facts.iter().all(|r| r.record.memory_type == MemoryType::Fact));

    let family = SearchFilter::any().with_eq("category", "family");
    let results = manager
        .search_memories("tea", Some(10), &family)
        .await
        .expect("family");
    assert_eq!(results.len(), 3);
    assert!(
        results
            .iter()
            .all(|r| r.record.metadata.get("category").and_then(|v| v.as_str()) == Some("family"))
    );
}

/// Conversation is admitted first and an overflowing memory is dropped whole.
#[tokio::test]
async fn context_budget_prefers_recent_conversation() {
    let temp = tempdir().expect("tempdir");
    let settings = MemorySettings {
        max_context_tokens: 50,
        ..MemorySettings::default()
    };
    let words = |text: &str| text.split_whitespace().count();
    let manager = open_manager(temp.path(), settings)
        .await
        .with_token_counter(Arc::new(words));

    let fact = vec!["garden"; 40].join(" ");
    manager
        .store_fact(&fact, None, Metadata::new())
        .await
        .expect("fact");
    let turn = vec!["garden"; 10].join(" ");
    manager.push_turn(Speaker::User, &turn);
    manager.push_turn(Speaker::Assistant, &turn);
    manager.push_turn(Speaker::User, &turn);

    let payload = manager
        .retrieve_context("garden", Some(3), &SearchFilter::any())
        .await
        .expect("context");
    assert_eq!(payload.conversation().count(), 3);
    assert_eq!(payload.memories().count(), 0);
    assert_eq!(payload.total_tokens, 30);
    assert!(payload.total_tokens <= 50);
}

#[tokio::test]
async fn conversation_buffer_is_bounded_by_history_length() {
    let temp = tempdir().expect("tempdir");
    let settings = MemorySettings {
        conversation_history_length: 3,
        ..MemorySettings::default()
    };
    let manager = open_manager(temp.path(), settings).await;
    for n in 0..3 {
        manager
            .store_conversation(&format!("question {n}"), &format!("answer {n}"), Metadata::new())
            .await
            .expect("conversation");
    }
    let recent: Vec<String> = manager
        .recent_conversation(10)
        .into_iter()
        .map(|turn| turn.text)
        .collect();
    assert_eq!(recent, vec!["answer 1", "question 2", "answer 2"]);

    manager.clear_conversation();
    assert!(manager.recent_conversation(10).is_empty());
    assert_eq!(manager.export_memories(&[MemoryType::Conversation]).len(), 3);
}

#[tokio::test]
async fn ranking_is_stable_across_calls() {
    let temp = tempdir().expect("tempdir");
    let manager = open_manager(temp.path(), MemorySettings::default()).await;
    for text in ["walk the dog", "feed the dog", "dog park on sunday", "buy dog food"] {
        manager
            .store_memory(MemoryType::Task, text, None, Metadata::new())
            .await
            .expect("task");
    }
    let first = manager
        .search_memories("dog", Some(4), &SearchFilter::any())
        .await
        .expect("search");
    for _ in 0..5 {
        let again = manager
            .search_memories("dog", Some(4), &SearchFilter::any())
            .await
            .expect("search");
        let ids = |results: &[agentic_rs_memory::ScoredRecord]| {
            results.iter().map(|r| r.record.id).collect::<Vec<_>>()
        };
        assert_eq!(ids(&again), ids(&first));
    }
}
