//! Durable record table kept consistent with a vector index.
//!
//! Records live in an append-only JSONL log. A write stages the record,
//! forwards it to the index, then commits; anything staged but never
//! committed is discarded on the next open.

use crate::error::MemoryError;
use crate::filter::SearchFilter;
use crate::index::{IndexKind, IndexPayload, VectorIndex, check_dimension};
use crate::model::{
    DELETED_KEY, MemoryRecord, MemoryType, Metadata, MetadataValue, NewMemory, ScoredRecord,
    validate_metadata,
};
use crate::persist::write_atomic;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// File name of the record log.
pub const RECORDS_FILE: &str = "records.jsonl";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum LogEntry {
    Stage { record: MemoryRecord },
    Commit { id: Uuid },
    Abort { id: Uuid },
    Annotate { id: Uuid, metadata: Metadata },
}

/// Outcome of replaying the record log.
#[derive(Debug, Default)]
struct Replay {
    committed: BTreeMap<Uuid, MemoryRecord>,
    pending: BTreeMap<Uuid, MemoryRecord>,
}

/// Record table plus the index that searches it.
pub struct MemoryStore {
    index: Arc<dyn VectorIndex>,
    log_path: PathBuf,
    log: Mutex<File>,
    records: RwLock<BTreeMap<Uuid, MemoryRecord>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("log_path", &self.log_path)
            .field("index", &self.index.kind())
            .field("records", &self.records.read().len())
            .finish()
    }
}

impl MemoryStore {
    /// Open the record log under `root`, recovering from interrupted writes.
    ///
    /// Staged records without a commit are removed from the index and
    /// dropped, then the log is compacted.
    pub async fn open(
        root: impl AsRef<Path>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self, MemoryError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let log_path = root.join(RECORDS_FILE);
        let replay = replay_log(&log_path)?;

        for record in replay.committed.values() {
            check_dimension(index.dimension(), &record.embedding)?;
        }
        for id in replay.pending.keys() {
            index.delete(*id).await?;
            warn!("discarded uncommitted memory record (id={id})");
        }
        if !replay.pending.is_empty() || log_path.exists() {
            compact_log(&log_path, &replay.committed)?;
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        info!(
            "opened memory store (path={}, backend={}, records={}, discarded={})",
            log_path.display(),
            index.kind(),
            replay.committed.len(),
            replay.pending.len()
        );
        Ok(Self {
            index,
            log_path,
            log: Mutex::new(log),
            records: RwLock::new(replay.committed),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Embedding dimension enforced by the index.
    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Backend variant of the index.
    pub fn index_kind(&self) -> IndexKind {
        self.index.kind()
    }

    /// Location of the record log.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn append(&self, entry: &LogEntry) -> Result<(), MemoryError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.log.lock().write_all(&line)?;
        Ok(())
    }

    /// Validate and persist a record, then index it.
    ///
    /// Either both the record and its vector are stored, or neither is.
    pub async fn put(&self, memory: NewMemory) -> Result<MemoryRecord, MemoryError> {
        let record = memory.into_record()?;
        check_dimension(self.index.dimension(), &record.embedding)?;
        let _guard = self.write_lock.lock().await;
        if self.records.read().contains_key(&record.id) {
            return Err(MemoryError::DuplicateId(record.id));
        }

        self.append(&LogEntry::Stage {
            record: record.clone(),
        })?;
        if let Err(err) = self
            .index
            .upsert(record.id, &record.embedding, IndexPayload::from(&record))
            .await
        {
            if let Err(abort_err) = self.append(&LogEntry::Abort { id: record.id }) {
                warn!(
                    "failed to record aborted write (id={}): {abort_err}",
                    record.id
                );
            }
            return Err(err);
        }
        if let Err(err) = self.append(&LogEntry::Commit { id: record.id }) {
            if let Err(delete_err) = self.index.delete(record.id).await {
                warn!(
                    "failed to roll back indexed vector (id={}): {delete_err}",
                    record.id
                );
            }
            return Err(err);
        }

        self.records.write().insert(record.id, record.clone());
        debug!(
            "stored memory record (id={}, type={}, content_len={})",
            record.id,
            record.memory_type,
            record.content.len()
        );
        Ok(record)
    }

    /// Fetch a record by id, including soft-deleted ones.
    pub fn get(&self, id: Uuid) -> Result<MemoryRecord, MemoryError> {
        self.records
            .read()
            .get(&id)
            .cloned()
            .ok_or(MemoryError::NotFound(id))
    }

    /// Rank records by similarity to `embedding` and hydrate them.
    pub async fn query_by_vector(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        check_dimension(self.index.dimension(), embedding)?;
        let hits = self.index.search(embedding, k, filter).await?;
        let records = self.records.read();
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(record) = records.get(&hit.id) else {
                warn!("index returned unknown memory record (id={})", hit.id);
                continue;
            };
            if record.is_deleted() {
                continue;
            }
            results.push(ScoredRecord {
                record: record.clone(),
                similarity: hit.score,
                score: hit.score,
            });
        }
        Ok(results)
    }

    /// Replace a record's metadata. Content and embedding never change.
    pub async fn annotate(&self, id: Uuid, metadata: Metadata) -> Result<MemoryRecord, MemoryError> {
        validate_metadata(&metadata)?;
        let _guard = self.write_lock.lock().await;
        self.annotate_locked(id, metadata)
    }

    fn annotate_locked(&self, id: Uuid, metadata: Metadata) -> Result<MemoryRecord, MemoryError> {
        if !self.records.read().contains_key(&id) {
            return Err(MemoryError::NotFound(id));
        }
        self.append(&LogEntry::Annotate {
            id,
            metadata: metadata.clone(),
        })?;
        let mut records = self.records.write();
        let record = records.get_mut(&id).ok_or(MemoryError::NotFound(id))?;
        record.metadata = metadata;
        Ok(record.clone())
    }

    /// Mark a record deleted and drop its vector; repeated calls are no-ops.
    pub async fn soft_delete(&self, id: Uuid) -> Result<MemoryRecord, MemoryError> {
        let _guard = self.write_lock.lock().await;
        let record = self.get(id)?;
        let record = if record.is_deleted() {
            record
        } else {
            let mut metadata = record.metadata;
            metadata.insert(DELETED_KEY.to_string(), MetadataValue::Bool(true));
            self.annotate_locked(id, metadata)?
        };
        self.index.delete(id).await?;
        debug!("soft-deleted memory record (id={id})");
        Ok(record)
    }

    /// Live records, oldest first, optionally restricted to some types.
    pub fn list(&self, memory_types: &[MemoryType]) -> Vec<MemoryRecord> {
        let mut records: Vec<MemoryRecord> = self
            .records
            .read()
            .values()
            .filter(|record| !record.is_deleted())
            .filter(|record| memory_types.is_empty() || memory_types.contains(&record.memory_type))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Live record counts per memory type.
    pub fn counts(&self) -> BTreeMap<MemoryType, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records.read().values() {
            if !record.is_deleted() {
                *counts.entry(record.memory_type).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Number of vectors held by the index.
    pub async fn indexed_len(&self) -> Result<usize, MemoryError> {
        self.index.len().await
    }

    /// Sync the record log and persist index state.
    pub async fn flush(&self) -> Result<(), MemoryError> {
        let _guard = self.write_lock.lock().await;
        self.log.lock().sync_all()?;
        self.index.flush().await?;
        info!(
            "flushed memory store (path={}, records={})",
            self.log_path.display(),
            self.records.read().len()
        );
        Ok(())
    }
}

/// Replay the log. An unparseable final line without a trailing newline is
/// an interrupted append and is dropped; anything else unparseable is fatal.
fn replay_log(path: &Path) -> Result<Replay, MemoryError> {
    let mut replay = Replay::default();
    if !path.exists() {
        return Ok(replay);
    }
    let contents = std::fs::read(path)?;
    let terminated = contents.ends_with(b"\n");
    let lines: Vec<&[u8]> = contents
        .split(|byte| *byte == b'\n')
        .filter(|line| !line.is_empty())
        .collect();
    for (number, line) in lines.iter().enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let entry: LogEntry = match serde_json::from_slice(line) {
            Ok(entry) => entry,
            Err(err) if !terminated && number + 1 == lines.len() => {
                warn!(
                    "dropped torn record log tail (path={}, line={}): {err}",
                    path.display(),
                    number + 1
                );
                break;
            }
            Err(err) => {
                return Err(MemoryError::corrupt(
                    path,
                    format!("line {}: {err}", number + 1),
                ));
            }
        };
        apply_entry(&mut replay, entry)
            .map_err(|reason| MemoryError::corrupt(path, format!("line {}: {reason}", number + 1)))?;
    }
    Ok(replay)
}

fn apply_entry(replay: &mut Replay, entry: LogEntry) -> Result<(), String> {
    match entry {
        LogEntry::Stage { record } => {
            if replay.committed.contains_key(&record.id) {
                return Err(format!("record {} staged twice", record.id));
            }
            replay.pending.insert(record.id, record);
        }
        LogEntry::Commit { id } => {
            let record = replay
                .pending
                .remove(&id)
                .ok_or_else(|| format!("commit for unknown record {id}"))?;
            replay.committed.insert(id, record);
        }
        LogEntry::Abort { id } => {
            replay.pending.remove(&id);
        }
        LogEntry::Annotate { id, metadata } => {
            let record = replay
                .committed
                .get_mut(&id)
                .ok_or_else(|| format!("annotation for unknown record {id}"))?;
            record.metadata = metadata;
        }
    }
    Ok(())
}

/// Rewrite the log with one stage/commit pair per committed record.
fn compact_log(path: &Path, records: &BTreeMap<Uuid, MemoryRecord>) -> Result<(), MemoryError> {
    let mut buffer = Vec::new();
    for record in records.values() {
        let stage = LogEntry::Stage {
            record: record.clone(),
        };
        serde_json::to_writer(&mut buffer, &stage)?;
        buffer.push(b'\n');
        serde_json::to_writer(&mut buffer, &LogEntry::Commit { id: record.id })?;
        buffer.push(b'\n');
    }
    write_atomic(path, &buffer)?;
    debug!(
        "compacted record log (path={}, records={})",
        path.display(),
        records.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::LocalIndex;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    async fn open_store(root: &Path) -> MemoryStore {
        let index = LocalIndex::open(root, 2).expect("index");
        MemoryStore::open(root, Arc::new(index)).await.expect("store")
    }

    fn memory(memory_type: MemoryType, content: &str, embedding: [f32; 2]) -> NewMemory {
        NewMemory::new(memory_type, content, embedding.to_vec())
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(temp.path()).await;
        let mut metadata = Metadata::new();
        metadata.insert("category".to_string(), "family".into());
        let stored = store
            .put(memory(MemoryType::Fact, "has a daughter", [1.0, 0.0]).with_metadata(metadata.clone()))
            .await
            .expect("put");
        let loaded = store.get(stored.id).expect("get");
        assert_eq!(loaded, stored);
        assert_eq!(loaded.metadata, metadata);
        assert_eq!(loaded.importance, 0.7);
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(temp.path()).await;
        let id = Uuid::new_v4();
        assert!(matches!(store.get(id), Err(MemoryError::NotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn put_rejects_wrong_dimension_without_writing() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(temp.path()).await;
        let err = store
            .put(NewMemory::new(MemoryType::Fact, "x", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch { expected: 2, actual: 3 }));
        assert!(store.list(&[]).is_empty());
    }

    #[tokio::test]
    async fn put_rejects_duplicate_id() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(temp.path()).await;
        let id = Uuid::new_v4();
        store
            .put(memory(MemoryType::Note, "first", [1.0, 0.0]).with_id(id))
            .await
            .expect("first");
        let err = store
            .put(memory(MemoryType::Note, "second", [0.0, 1.0]).with_id(id))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::DuplicateId(dup) if dup == id));
        assert_eq!(store.get(id).expect("get").content, "first");
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let temp = tempdir().expect("tempdir");
        let stored = {
            let store = open_store(temp.path()).await;
            let stored = store
                .put(memory(MemoryType::Preference, "likes tea", [0.0, 1.0]))
                .await
                .expect("put");
            store.flush().await.expect("flush");
            stored
        };
        let store = open_store(temp.path()).await;
        assert_eq!(store.get(stored.id).expect("get"), stored);
        let hits = store
            .query_by_vector(&[0.0, 1.0], 1, &SearchFilter::any())
            .await
            .expect("query");
        assert_eq!(hits[0].record.id, stored.id);
    }

    #[tokio::test]
    async fn uncommitted_stage_is_discarded_on_open() {
        let temp = tempdir().expect("tempdir");
        let index = Arc::new(LocalIndex::open(temp.path(), 2).expect("index"));
        let orphan = NewMemory::new(MemoryType::Fact, "half written", vec![1.0, 0.0])
            .into_record()
            .expect("record");
        index
            .upsert(orphan.id, &orphan.embedding, IndexPayload::from(&orphan))
            .await
            .expect("upsert");
        let line = serde_json::to_string(&LogEntry::Stage {
            record: orphan.clone(),
        })
        .expect("json");
        std::fs::write(temp.path().join(RECORDS_FILE), format!("{line}\n")).expect("write");

        let store = MemoryStore::open(temp.path(), index.clone()).await.expect("store");
        assert!(matches!(store.get(orphan.id), Err(MemoryError::NotFound(_))));
        assert_eq!(index.len().await.expect("len"), 0);
        let log = std::fs::read_to_string(temp.path().join(RECORDS_FILE)).expect("log");
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn unparseable_log_line_is_corrupt_state() {
        let temp = tempdir().expect("tempdir");
        std::fs::write(temp.path().join(RECORDS_FILE), "{\"op\":\"stage\"\n").expect("write");
        let index = LocalIndex::open(temp.path(), 2).expect("index");
        let err = MemoryStore::open(temp.path(), Arc::new(index))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::CorruptPersistedState { .. }));
    }

    #[tokio::test]
    async fn torn_final_line_is_dropped_on_open() {
        let temp = tempdir().expect("tempdir");
        let stored = {
            let store = open_store(temp.path()).await;
            store
                .put(memory(MemoryType::Fact, "likes tea", [1.0, 0.0]))
                .await
                .expect("put")
        };
        let log_path = temp.path().join(RECORDS_FILE);
        let mut log = OpenOptions::new().append(true).open(&log_path).expect("log");
        log.write_all(br#"{"op":"stage","record":{"id":"0"#)
            .expect("torn write");
        drop(log);

        let store = open_store(temp.path()).await;
        assert_eq!(store.get(stored.id).expect("get"), stored);
        let compacted = std::fs::read_to_string(&log_path).expect("log");
        assert!(compacted.ends_with('\n'));
        assert_eq!(compacted.lines().count(), 2);

        let next = store
            .put(memory(MemoryType::Note, "after recovery", [0.0, 1.0]))
            .await
            .expect("put after recovery");
        drop(store);
        let reopened = open_store(temp.path()).await;
        assert_eq!(reopened.list(&[]).len(), 2);
        assert_eq!(reopened.get(next.id).expect("get").content, "after recovery");
    }

    #[tokio::test]
    async fn garbage_before_the_last_line_stays_fatal() {
        let temp = tempdir().expect("tempdir");
        {
            let store = open_store(temp.path()).await;
            store
                .put(memory(MemoryType::Fact, "likes tea", [1.0, 0.0]))
                .await
                .expect("put");
        }
        let log_path = temp.path().join(RECORDS_FILE);
        let contents = std::fs::read_to_string(&log_path).expect("log");
        std::fs::write(&log_path, format!("{{\"op\":\"sta\n{contents}")).expect("write");

        let index = LocalIndex::open(temp.path(), 2).expect("index");
        let err = MemoryStore::open(temp.path(), Arc::new(index))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::CorruptPersistedState { .. }));
    }

    #[tokio::test]
    async fn non_finite_metadata_is_rejected_and_store_reopens() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(temp.path()).await;
        let kept = store
            .put(memory(MemoryType::Fact, "likes tea", [1.0, 0.0]))
            .await
            .expect("put");

        let mut bad = Metadata::new();
        bad.insert("score".to_string(), MetadataValue::Number(f64::NAN));
        let err = store
            .put(memory(MemoryType::Fact, "likes coffee", [0.0, 1.0]).with_metadata(bad.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidRecord(_)));
        bad.insert("score".to_string(), MetadataValue::Number(f64::INFINITY));
        let err = store.annotate(kept.id, bad).await.unwrap_err();
        assert!(matches!(err, MemoryError::InvalidRecord(_)));
        assert_eq!(store.indexed_len().await.expect("len"), 1);
        store.flush().await.expect("flush");
        drop(store);

        let reopened = open_store(temp.path()).await;
        assert_eq!(reopened.list(&[]), vec![kept]);
    }

    #[tokio::test]
    async fn soft_delete_hides_from_search_but_keeps_record() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(temp.path()).await;
        let stored = store
            .put(memory(MemoryType::Task, "buy milk", [1.0, 0.0]))
            .await
            .expect("put");
        store.soft_delete(stored.id).await.expect("delete");
        store.soft_delete(stored.id).await.expect("delete again");

        let hits = store
            .query_by_vector(&[1.0, 0.0], 5, &SearchFilter::any())
            .await
            .expect("query");
        assert!(hits.is_empty());
        assert!(store.get(stored.id).expect("get").is_deleted());
        assert!(store.list(&[]).is_empty());
        assert_eq!(store.indexed_len().await.expect("len"), 0);

        drop(store);
        let reopened = open_store(temp.path()).await;
        assert!(reopened.get(stored.id).expect("get").is_deleted());
    }

    #[tokio::test]
    async fn list_and_counts_skip_deleted_and_filter_types() {
        let temp = tempdir().expect("tempdir");
        let store = open_store(temp.path()).await;
        let fact = store
            .put(memory(MemoryType::Fact, "fact", [1.0, 0.0]))
            .await
            .expect("fact");
        store
            .put(memory(MemoryType::Note, "note", [0.0, 1.0]))
            .await
            .expect("note");
        let gone = store
            .put(memory(MemoryType::Note, "gone", [0.5, 0.5]))
            .await
            .expect("gone");
        store.soft_delete(gone.id).await.expect("delete");

        let facts = store.list(&[MemoryType::Fact]);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].id, fact.id);

        let counts = store.counts();
        assert_eq!(counts.get(&MemoryType::Fact), Some(&1));
        assert_eq!(counts.get(&MemoryType::Note), Some(&1));
    }
}
