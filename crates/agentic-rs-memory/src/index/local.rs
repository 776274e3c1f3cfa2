//! In-process vector index with exact cosine search, persisted as JSON.

use super::{
    IndexHit, IndexKind, IndexPayload, VectorIndex, check_dimension, compare_hits,
    cosine_similarity,
};
use crate::error::MemoryError;
use crate::filter::SearchFilter;
use crate::persist::write_atomic;
use async_trait::async_trait;
use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// File name of the persisted vector table.
pub const VECTORS_FILE: &str = "vectors.json";

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    id: Uuid,
    embedding: Vec<f32>,
    payload: IndexPayload,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorFile {
    version: u32,
    dimension: usize,
    entries: Vec<VectorEntry>,
}

/// Brute-force cosine index holding every vector in memory.
///
/// Mutations take the write lock and persist before releasing it, so a
/// restart reloads exactly what searches observed.
#[derive(Debug)]
pub struct LocalIndex {
    path: PathBuf,
    dimension: usize,
    entries: RwLock<BTreeMap<Uuid, VectorEntry>>,
}

impl LocalIndex {
    /// Open (or create) the index under `root`, loading any persisted vectors.
    pub fn open(root: impl AsRef<Path>, dimension: usize) -> Result<Self, MemoryError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let path = root.join(VECTORS_FILE);
        let entries = load_entries(&path, dimension)?;
        info!(
            "opened local index (path={}, dimension={}, entries={})",
            path.display(),
            dimension,
            entries.len()
        );
        Ok(Self {
            path,
            dimension,
            entries: RwLock::new(entries),
        })
    }

    /// Location of the persisted vector table.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<Uuid, VectorEntry>) -> Result<(), MemoryError> {
        let file = VectorFile {
            version: FORMAT_VERSION,
            dimension: self.dimension,
            entries: entries.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec(&file)?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }
}

fn load_entries(path: &Path, dimension: usize) -> Result<BTreeMap<Uuid, VectorEntry>, MemoryError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let bytes = std::fs::read(path)?;
    let file: VectorFile =
        serde_json::from_slice(&bytes).map_err(|err| MemoryError::corrupt(path, err))?;
    if file.version != FORMAT_VERSION {
        return Err(MemoryError::corrupt(
            path,
            format!("unsupported format version {}", file.version),
        ));
    }
    if file.dimension != dimension {
        return Err(MemoryError::DimensionMismatch {
            expected: dimension,
            actual: file.dimension,
        });
    }
    let mut entries = BTreeMap::new();
    for entry in file.entries {
        if entry.embedding.len() != dimension {
            return Err(MemoryError::corrupt(
                path,
                format!(
                    "entry {} has {} values, expected {dimension}",
                    entry.id,
                    entry.embedding.len()
                ),
            ));
        }
        let id = entry.id;
        if entries.insert(id, entry).is_some() {
            return Err(MemoryError::corrupt(path, format!("duplicate entry {id}")));
        }
    }
    Ok(entries)
}

#[async_trait]
impl VectorIndex for LocalIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Local
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(
        &self,
        id: Uuid,
        embedding: &[f32],
        payload: IndexPayload,
    ) -> Result<(), MemoryError> {
        check_dimension(self.dimension, embedding)?;
        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            return Err(MemoryError::DuplicateId(id));
        }
        entries.insert(
            id,
            VectorEntry {
                id,
                embedding: embedding.to_vec(),
                payload,
            },
        );
        if let Err(err) = self.persist(&entries) {
            entries.remove(&id);
            return Err(err);
        }
        debug!("indexed vector (id={id}, entries={})", entries.len());
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<IndexHit>, MemoryError> {
        check_dimension(self.dimension, query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let entries = self.entries.read();
        let mut hits: Vec<IndexHit> = entries
            .values()
            .filter(|entry| filter.matches(entry.payload.memory_type, &entry.payload.metadata))
            .map(|entry| IndexHit {
                id: entry.id,
                score: cosine_similarity(query, &entry.embedding),
                created_at: entry.payload.created_at,
            })
            .collect();
        drop(entries);
        hits.sort_by(compare_hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, id: Uuid) -> Result<(), MemoryError> {
        let mut entries = self.entries.write();
        let Some(removed) = entries.remove(&id) else {
            return Ok(());
        };
        if let Err(err) = self.persist(&entries) {
            entries.insert(id, removed);
            return Err(err);
        }
        debug!("removed vector (id={id}, entries={})", entries.len());
        Ok(())
    }

    async fn len(&self) -> Result<usize, MemoryError> {
        Ok(self.entries.read().len())
    }

    async fn flush(&self) -> Result<(), MemoryError> {
        let entries = self.entries.read();
        self.persist(&entries)?;
        info!(
            "flushed local index (path={}, entries={})",
            self.path.display(),
            entries.len()
        );
        Ok(())
    }
}
