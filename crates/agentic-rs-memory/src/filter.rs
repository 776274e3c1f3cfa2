//! Search filters applied before similarity ranking.

use crate::model::{Metadata, MetadataValue, MemoryType};
use std::collections::{BTreeMap, BTreeSet};

/// Condition on a single metadata key.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataCondition {
    /// Value must equal.
    Eq(MetadataValue),
    /// Value must equal one of the listed values.
    AnyOf(Vec<MetadataValue>),
}

impl MetadataCondition {
    fn matches(&self, value: &MetadataValue) -> bool {
        match self {
            MetadataCondition::Eq(expected) => expected == value,
            MetadataCondition::AnyOf(options) => options.iter().any(|option| option == value),
        }
    }
}

/// Key/value conditions over record metadata; all must hold.
pub type MetadataFilter = BTreeMap<String, MetadataCondition>;

/// Combined memory-type and metadata filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    /// Allowed memory types; empty means any.
    pub memory_types: BTreeSet<MemoryType>,
    /// Metadata conditions.
    pub metadata: MetadataFilter,
}

impl SearchFilter {
    /// Filter that accepts everything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to the given memory types.
    pub fn types(memory_types: impl IntoIterator<Item = MemoryType>) -> Self {
        Self {
            memory_types: memory_types.into_iter().collect(),
            metadata: MetadataFilter::new(),
        }
    }

    /// Require `key == value`.
    pub fn with_eq(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata
            .insert(key.into(), MetadataCondition::Eq(value.into()));
        self
    }

    /// Require `key` to be one of `values`.
    pub fn with_any_of(
        mut self,
        key: impl Into<String>,
        values: impl IntoIterator<Item = MetadataValue>,
    ) -> Self {
        self.metadata.insert(
            key.into(),
            MetadataCondition::AnyOf(values.into_iter().collect()),
        );
        self
    }

    /// Whether a candidate with this type and metadata passes the filter.
    pub fn matches(&self, memory_type: MemoryType, metadata: &Metadata) -> bool {
        if !self.memory_types.is_empty() && !self.memory_types.contains(&memory_type) {
            return false;
        }
        self.metadata.iter().all(|(key, condition)| {
            metadata
                .get(key)
                .is_some_and(|value| condition.matches(value))
        })
    }

    /// Whether the filter accepts every candidate.
    pub fn is_empty(&self) -> bool {
        self.memory_types.is_empty() && self.metadata.is_empty()
    }
}
