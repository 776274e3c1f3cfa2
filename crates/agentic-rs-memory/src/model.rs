//! Memory record model shared by the store, indexes, and manager.

use crate::error::MemoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Metadata key used to mark a record as soft-deleted.
pub const DELETED_KEY: &str = "deleted";

/// Closed set of memory kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Conversation,
    Fact,
    Preference,
    Task,
    Note,
    Context,
}

impl MemoryType {
    /// All memory types in declaration order.
    pub const ALL: [MemoryType; 6] = [
        MemoryType::Conversation,
        MemoryType::Fact,
        MemoryType::Preference,
        MemoryType::Task,
        MemoryType::Note,
        MemoryType::Context,
    ];

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::Conversation => "conversation",
            MemoryType::Fact => "fact",
            MemoryType::Preference => "preference",
            MemoryType::Task => "task",
            MemoryType::Note => "note",
            MemoryType::Context => "context",
        }
    }

    /// Importance assigned when the caller does not provide one.
    pub fn default_importance(self) -> f32 {
        match self {
            MemoryType::Conversation => 0.3,
            MemoryType::Fact => 0.7,
            MemoryType::Preference => 0.8,
            MemoryType::Task => 0.6,
            MemoryType::Note => 0.5,
            MemoryType::Context => 0.4,
        }
    }

    /// Capitalized label used when rendering context.
    pub fn label(self) -> &'static str {
        match self {
            MemoryType::Conversation => "Conversation",
            MemoryType::Fact => "Fact",
            MemoryType::Preference => "Preference",
            MemoryType::Task => "Task",
            MemoryType::Note => "Note",
            MemoryType::Context => "Context",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = MemoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        MemoryType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| MemoryError::InvalidRecord(format!("unknown memory type: {value}")))
    }
}

/// Scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl MetadataValue {
    /// String view if the value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Bool view if the value is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Convert into a JSON value for wire payloads.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MetadataValue::Bool(value) => serde_json::Value::Bool(*value),
            MetadataValue::Number(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            MetadataValue::String(value) => serde_json::Value::String(value.clone()),
        }
    }

    /// Convert from a JSON scalar; arrays, objects and null are rejected.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(value) => Some(MetadataValue::Bool(*value)),
            serde_json::Value::Number(value) => value.as_f64().map(MetadataValue::Number),
            serde_json::Value::String(value) => Some(MetadataValue::String(value.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(value) => write!(f, "{value}"),
            MetadataValue::Number(value) => write!(f, "{value}"),
            MetadataValue::String(value) => f.write_str(value),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Number(value as f64)
    }
}

/// Ordered metadata map; used for filtering only.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Persisted memory record. Content and embedding never change after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    /// Record identifier.
    pub id: Uuid,
    /// Remembered text.
    pub content: String,
    /// Memory kind.
    pub memory_type: MemoryType,
    /// Embedding of the content.
    pub embedding: Vec<f32>,
    /// Ranking boost in `[0, 1]`.
    pub importance: f32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Filterable metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl MemoryRecord {
    /// Whether the record has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.metadata
            .get(DELETED_KEY)
            .and_then(MetadataValue::as_bool)
            .unwrap_or(false)
    }
}

/// Record handed to the store before id and timestamp are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemory {
    /// Optional caller-chosen id.
    pub id: Option<Uuid>,
    /// Remembered text.
    pub content: String,
    /// Memory kind.
    pub memory_type: MemoryType,
    /// Embedding of the content.
    pub embedding: Vec<f32>,
    /// Optional importance; defaults per memory type.
    pub importance: Option<f32>,
    /// Optional creation timestamp.
    pub created_at: Option<DateTime<Utc>>,
    /// Filterable metadata.
    pub metadata: Metadata,
}

impl NewMemory {
    /// Start a new record with type defaults.
    pub fn new(memory_type: MemoryType, content: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: None,
            content: content.into(),
            memory_type,
            embedding,
            importance: None,
            created_at: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Validate fields and assign id, timestamp and importance defaults.
    pub(crate) fn into_record(self) -> Result<MemoryRecord, MemoryError> {
        if self.content.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("content is empty".to_string()));
        }
        let importance = self
            .importance
            .unwrap_or_else(|| self.memory_type.default_importance());
        if !(0.0..=1.0).contains(&importance) {
            return Err(MemoryError::InvalidRecord(format!(
                "importance {importance} outside [0, 1]"
            )));
        }
        if self.embedding.iter().any(|value| !value.is_finite()) {
            return Err(MemoryError::InvalidRecord(
                "embedding contains non-finite values".to_string(),
            ));
        }
        validate_metadata(&self.metadata)?;
        Ok(MemoryRecord {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            content: self.content,
            memory_type: self.memory_type,
            embedding: self.embedding,
            importance,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            metadata: self.metadata,
        })
    }
}

/// Reject metadata that cannot round-trip through JSON.
pub(crate) fn validate_metadata(metadata: &Metadata) -> Result<(), MemoryError> {
    for (key, value) in metadata {
        if let MetadataValue::Number(number) = value
            && !number.is_finite()
        {
            return Err(MemoryError::InvalidRecord(format!(
                "metadata `{key}` is not a finite number"
            )));
        }
    }
    Ok(())
}

/// Record hydrated from a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    /// Full record.
    pub record: MemoryRecord,
    /// Cosine similarity to the query, higher is better.
    pub similarity: f32,
    /// Ranking score after the importance boost.
    pub score: f32,
}
