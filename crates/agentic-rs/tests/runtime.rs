//! End-to-end wiring from config to a working memory manager.

use agentic_rs::config::{AgenticConfig, ContextConfig, MemoryBackend, MemoryConfig};
use agentic_rs::memory::{EmbeddingProvider, MemoryType, Metadata, SearchFilter};
use agentic_rs::{SetupError, embedder_from_config, open_memory, settings_from_config};
use agentic_rs_test_utils::KeywordEmbedder;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIMENSION: usize = 32;

fn local_config(dir: &TempDir) -> AgenticConfig {
    AgenticConfig::builder()
        .memory(MemoryConfig {
            path: dir.path().join("memory").display().to_string(),
            dimension: DIMENSION,
            ..MemoryConfig::default()
        })
        .context(ContextConfig {
            max_context_tokens: 400,
            ..ContextConfig::default()
        })
        .build()
}

#[tokio::test]
async fn local_memory_survives_reopen() {
    let dir = TempDir::new().expect("tmp");
    let config = local_config(&dir);
    let embedder = Arc::new(KeywordEmbedder::new(DIMENSION));

    let manager = open_memory(&config, embedder.clone()).await.expect("open");
    let fact = manager
        .store_fact("The user's dog is named Max", None, Metadata::new())
        .await
        .expect("fact");
    manager
        .store_preference("Prefers tea over coffee", Some("drinks"), Metadata::new())
        .await
        .expect("preference");
    manager.close().await.expect("close");

    let reopened = open_memory(&config, embedder).await.expect("reopen");
    let stats = reopened.stats().await.expect("stats");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.indexed_vectors, 2);

    let hits = reopened
        .search_memories("what is the dog named", Some(1), &SearchFilter::any())
        .await
        .expect("search");
    assert_eq!(hits[0].record.id, fact.id);

    let payload = reopened
        .retrieve_context("dog", None, &SearchFilter::types([MemoryType::Fact]))
        .await
        .expect("context");
    assert!(payload.render().contains("[Fact] The user's dog is named Max"));
    assert!(payload.total_tokens <= 400);
}

#[tokio::test]
async fn invalid_config_is_rejected_before_opening() {
    let dir = TempDir::new().expect("tmp");
    let mut config = local_config(&dir);
    config.memory.retrieval_count = 0;
    let err = open_memory(&config, Arc::new(KeywordEmbedder::new(DIMENSION)))
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::Config(_)));
    assert!(!dir.path().join("memory").exists());
}

#[tokio::test]
async fn remote_backend_requires_api_key() {
    let dir = TempDir::new().expect("tmp");
    let mut config = local_config(&dir);
    config.memory.backend = MemoryBackend::Remote;
    config.memory.remote.endpoint = Some("http://127.0.0.1:9".to_string());
    config.memory.remote.api_key_env = "AGENTIC_RS_TEST_NO_SUCH_KEY".to_string();
    let err = open_memory(&config, Arc::new(KeywordEmbedder::new(DIMENSION)))
        .await
        .unwrap_err();
    match err {
        SetupError::MissingApiKey { env, .. } => assert_eq!(env, "AGENTIC_RS_TEST_NO_SUCH_KEY"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn remote_backend_reports_namespace_count() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/describe_index_stats"))
        .and(header("Api-Key", "remote-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "namespaces": { "alice": { "vectorCount": 4 } },
            "totalVectorCount": 9
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tmp");
    let mut config = local_config(&dir);
    config.memory.backend = MemoryBackend::Remote;
    config.memory.remote.endpoint = Some(server.uri());
    config.memory.remote.api_key = Some("remote-key".to_string());
    config.memory.remote.namespace = Some("alice".to_string());

    let manager = open_memory(&config, Arc::new(KeywordEmbedder::new(DIMENSION)))
        .await
        .expect("open");
    let stats = manager.stats().await.expect("stats");
    assert_eq!(stats.total, 0);
    assert_eq!(stats.indexed_vectors, 4);
}

#[tokio::test]
async fn embedder_from_config_calls_embeddings_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("Authorization", "Bearer embed-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.5, 0.25, 0.0] }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = AgenticConfig::default().embedding;
    config.endpoint = format!("{}/v1", server.uri());
    config.api_key = Some("embed-key".to_string());
    let embedder = embedder_from_config(&config).expect("embedder");
    let vector = embedder.embed("hello").await.expect("embed");
    assert_eq!(vector, vec![0.5, 0.25, 0.0]);
}

#[test]
fn settings_follow_config() {
    let config = AgenticConfig::load_from_str(
        "{ memory: { retrieval_count: 7, importance_weight: 0.2 }, context: { conversation_history_length: 4 } }",
    )
    .expect("config");
    let settings = settings_from_config(&config);
    assert_eq!(settings.retrieval_count, 7);
    assert_eq!(settings.importance_weight, 0.2);
    assert_eq!(settings.conversation_history_length, 4);
    assert_eq!(settings.dedup_threshold, 0.98);
}
