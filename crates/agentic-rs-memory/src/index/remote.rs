//! Vector index backed by a managed, Pinecone-compatible HTTP service.

use super::{IndexHit, IndexKind, IndexPayload, VectorIndex, check_dimension, compare_hits};
use crate::error::MemoryError;
use crate::filter::{MetadataCondition, SearchFilter};
use crate::model::{Metadata, MetadataValue, MemoryType};
use crate::retry::{Attempt, RetryPolicy};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::{debug, info};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Prefix for record metadata keys inside the flattened remote payload.
const METADATA_PREFIX: &str = "metadata.";

/// Connection settings for [`RemoteIndex`].
#[derive(Debug, Clone)]
pub struct RemoteIndexOptions {
    /// Index host, e.g. `https://memories-abc123.svc.pinecone.io`.
    pub endpoint: String,
    /// API key sent as `Api-Key`.
    pub api_key: String,
    /// Optional namespace isolating this assistant's vectors.
    pub namespace: Option<String>,
    /// Embedding dimension of the index.
    pub dimension: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry schedule for transient failures.
    pub retry: RetryPolicy,
}

/// Remote vector index; the service is authoritative for vectors.
#[derive(Debug, Clone)]
pub struct RemoteIndex {
    client: reqwest::Client,
    options: RemoteIndexOptions,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(default)]
    total_vector_count: usize,
    #[serde(default)]
    namespaces: HashMap<String, NamespaceStats>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceStats {
    #[serde(default)]
    vector_count: usize,
}

impl RemoteIndex {
    /// Build a client for the configured service.
    pub fn new(options: RemoteIndexOptions) -> Result<Self, MemoryError> {
        if options.endpoint.trim().is_empty() {
            return Err(MemoryError::IndexUnavailable(
                "remote index endpoint is not configured".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|err| MemoryError::IndexUnavailable(err.to_string()))?;
        info!(
            "initialized remote index (endpoint={}, namespace={}, dimension={})",
            options.endpoint,
            options.namespace.as_deref().unwrap_or(""),
            options.dimension
        );
        Ok(Self { client, options })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.options.endpoint.trim_end_matches('/'))
    }

    fn namespace(&self) -> &str {
        self.options.namespace.as_deref().unwrap_or("")
    }

    /// Send a request built by `build`, retrying transport errors, 429 and 5xx.
    async fn call<T, F>(&self, label: &str, build: F) -> Result<T, MemoryError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        self.call_with(label, false, build).await
    }

    async fn call_with<T, F>(
        &self,
        label: &str,
        not_found_ok: bool,
        build: F,
    ) -> Result<T, MemoryError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        self.options
            .retry
            .run(label, || {
                let request = build().header("Api-Key", &self.options.api_key);
                async move { classify(request.send().await, not_found_ok).await }
            })
            .await
    }

    async fn exists(&self, id: Uuid) -> Result<bool, MemoryError> {
        let id = id.to_string();
        let response: FetchResponse = self
            .call("remote fetch", || {
                self.client
                    .get(self.url("/vectors/fetch"))
                    .query(&[("ids", id.as_str()), ("namespace", self.namespace())])
            })
            .await?;
        Ok(response.vectors.contains_key(&id))
    }
}

/// Map a response to a retry decision.
async fn classify<T: DeserializeOwned>(
    response: Result<reqwest::Response, reqwest::Error>,
    not_found_ok: bool,
) -> Attempt<T, MemoryError> {
    let response = match response {
        Ok(response) => response,
        Err(err) => return Attempt::Retry(MemoryError::IndexUnavailable(err.to_string())),
    };
    let status = response.status();
    if status.is_success() {
        return match response.json::<T>().await {
            Ok(value) => Attempt::Done(value),
            Err(err) => Attempt::Fail(MemoryError::IndexUnavailable(format!(
                "invalid response body: {err}"
            ))),
        };
    }
    if not_found_ok && status == reqwest::StatusCode::NOT_FOUND {
        return match serde_json::from_value(Value::Null) {
            Ok(value) => Attempt::Done(value),
            Err(err) => Attempt::Fail(MemoryError::Serde(err)),
        };
    }
    let body = response.text().await.unwrap_or_default();
    let err = MemoryError::IndexUnavailable(format!("status {status}: {body}"));
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Attempt::Retry(err)
    } else {
        Attempt::Fail(err)
    }
}

/// Flatten a payload into the service's scalar metadata map.
fn payload_to_metadata(payload: &IndexPayload) -> Value {
    let mut map = Map::new();
    map.insert(
        "memory_type".to_string(),
        Value::String(payload.memory_type.as_str().to_string()),
    );
    map.insert(
        "created_at".to_string(),
        Value::from(payload.created_at.timestamp_millis()),
    );
    for (key, value) in &payload.metadata {
        map.insert(format!("{METADATA_PREFIX}{key}"), value.to_json());
    }
    Value::Object(map)
}

/// Rebuild the filterable fields of a payload from service metadata.
fn metadata_to_payload(metadata: &Map<String, Value>) -> Option<IndexPayload> {
    let memory_type = metadata
        .get("memory_type")
        .and_then(Value::as_str)
        .and_then(|value| value.parse::<MemoryType>().ok())?;
    let created_at = metadata
        .get("created_at")
        .and_then(Value::as_f64)
        .and_then(|millis| Utc.timestamp_millis_opt(millis as i64).single())?;
    let mut fields = Metadata::new();
    for (key, value) in metadata {
        if let Some(key) = key.strip_prefix(METADATA_PREFIX)
            && let Some(value) = MetadataValue::from_json(value)
        {
            fields.insert(key.to_string(), value);
        }
    }
    Some(IndexPayload {
        memory_type,
        created_at,
        metadata: fields,
    })
}

/// Translate a search filter into the service filter language.
fn filter_to_json(filter: &SearchFilter) -> Option<Value> {
    if filter.is_empty() {
        return None;
    }
    let mut map = Map::new();
    if !filter.memory_types.is_empty() {
        let kinds: Vec<Value> = filter
            .memory_types
            .iter()
            .map(|kind| Value::String(kind.as_str().to_string()))
            .collect();
        map.insert("memory_type".to_string(), json!({ "$in": kinds }));
    }
    for (key, condition) in &filter.metadata {
        let clause = match condition {
            MetadataCondition::Eq(value) => json!({ "$eq": value.to_json() }),
            MetadataCondition::AnyOf(values) => {
                let values: Vec<Value> = values.iter().map(MetadataValue::to_json).collect();
                json!({ "$in": values })
            }
        };
        map.insert(format!("{METADATA_PREFIX}{key}"), clause);
    }
    Some(Value::Object(map))
}

#[async_trait]
impl VectorIndex for RemoteIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Remote
    }

    fn dimension(&self) -> usize {
        self.options.dimension
    }

    async fn upsert(
        &self,
        id: Uuid,
        embedding: &[f32],
        payload: IndexPayload,
    ) -> Result<(), MemoryError> {
        check_dimension(self.options.dimension, embedding)?;
        if self.exists(id).await? {
            return Err(MemoryError::DuplicateId(id));
        }
        let body = json!({
            "vectors": [{
                "id": id.to_string(),
                "values": embedding,
                "metadata": payload_to_metadata(&payload),
            }],
            "namespace": self.namespace(),
        });
        let _: Value = self
            .call("remote upsert", || {
                self.client.post(self.url("/vectors/upsert")).json(&body)
            })
            .await?;
        debug!("upserted remote vector (id={id})");
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<IndexHit>, MemoryError> {
        check_dimension(self.options.dimension, query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut body = json!({
            "vector": query,
            "topK": k,
            "includeMetadata": true,
            "includeValues": false,
            "namespace": self.namespace(),
        });
        if let Some(filter) = filter_to_json(filter) {
            body["filter"] = filter;
        }
        let response: QueryResponse = self
            .call("remote query", || {
                self.client.post(self.url("/query")).json(&body)
            })
            .await?;

        let mut hits = Vec::with_capacity(response.matches.len());
        for found in response.matches {
            let id = Uuid::parse_str(&found.id).map_err(|err| {
                MemoryError::IndexUnavailable(format!("invalid id {}: {err}", found.id))
            })?;
            let payload = found
                .metadata
                .as_ref()
                .and_then(metadata_to_payload)
                .ok_or_else(|| {
                    MemoryError::IndexUnavailable(format!("missing payload for {id}"))
                })?;
            if !filter.matches(payload.memory_type, &payload.metadata) {
                continue;
            }
            hits.push(IndexHit {
                id,
                score: found.score,
                created_at: payload.created_at,
            });
        }
        hits.sort_by(compare_hits);
        hits.truncate(k);
        debug!("remote query returned {} hits (k={k})", hits.len());
        Ok(hits)
    }

    async fn delete(&self, id: Uuid) -> Result<(), MemoryError> {
        let body = json!({
            "ids": [id.to_string()],
            "namespace": self.namespace(),
        });
        let _: Value = self
            .call_with("remote delete", true, || {
                self.client.post(self.url("/vectors/delete")).json(&body)
            })
            .await?;
        debug!("deleted remote vector (id={id})");
        Ok(())
    }

    async fn len(&self) -> Result<usize, MemoryError> {
        let stats: StatsResponse = self
            .call("remote stats", || {
                self.client
                    .post(self.url("/describe_index_stats"))
                    .json(&json!({}))
            })
            .await?;
        if self.options.namespace.is_some() {
            return Ok(stats
                .namespaces
                .get(self.namespace())
                .map(|ns| ns.vector_count)
                .unwrap_or(0));
        }
        Ok(stats.total_vector_count)
    }
}
