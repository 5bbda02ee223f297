use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use suite_core::model::{PracticeRecord, RecordId};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Repository contract for persisted practice records.
///
/// `save_record` is an upsert keyed by record id, so re-saving the same aggregate
/// replaces it instead of duplicating it.
#[async_trait]
pub trait PracticeRecordRepository: Send + Sync {
    /// Short name used in logs and save reports.
    fn backend_name(&self) -> &'static str;

    /// Persist or replace a record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn save_record(&self, record: &PracticeRecord) -> Result<(), StorageError>;

    /// List all records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn list_records(&self) -> Result<Vec<PracticeRecord>, StorageError>;

    /// Delete the given records, returning how many existed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    async fn delete_records(&self, ids: &[RecordId]) -> Result<usize, StorageError>;
}

/// Replace the record with the same id or append it, then drop the oldest entries
/// beyond `cap`. Returns how many were dropped.
pub(crate) fn upsert_capped(
    records: &mut Vec<PracticeRecord>,
    record: &PracticeRecord,
    cap: Option<usize>,
) -> usize {
    if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
        *existing = record.clone();
    } else {
        records.push(record.clone());
    }
    let overflow = cap.map_or(0, |cap| records.len().saturating_sub(cap));
    records.drain(..overflow);
    overflow
}

/// List-backed repository, optionally capped.
///
/// With a cap it serves as the fallback store: once full, the oldest records are
/// evicted first. Without one it is a plain in-memory repository for tests and
/// prototyping.
#[derive(Clone)]
pub struct InMemoryRepository {
    name: &'static str,
    cap: Option<usize>,
    records: Arc<Mutex<Vec<PracticeRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "memory",
            cap: None,
            records: Arc::new(Mutex::new(Vec::new())),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A list store retaining at most `cap` records.
    #[must_use]
    pub fn capped(cap: usize) -> Self {
        Self {
            name: "list_store",
            cap: Some(cap.max(1)),
            ..Self::new()
        }
    }

    #[must_use]
    pub fn cap(&self) -> Option<usize> {
        self.cap
    }

    /// Make every operation fail with `StorageError::Unavailable` (or recover).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(self.name.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PracticeRecordRepository for InMemoryRepository {
    fn backend_name(&self) -> &'static str {
        self.name
    }

    async fn save_record(&self, record: &PracticeRecord) -> Result<(), StorageError> {
        self.check_available()?;
        let mut guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let evicted = upsert_capped(&mut guard, record, self.cap);
        if evicted > 0 {
            tracing::debug!(backend = self.name, evicted, "evicted oldest records");
        }
        Ok(())
    }

    async fn list_records(&self) -> Result<Vec<PracticeRecord>, StorageError> {
        self.check_available()?;
        let guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.clone())
    }

    async fn delete_records(&self, ids: &[RecordId]) -> Result<usize, StorageError> {
        self.check_available()?;
        let mut guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let before = guard.len();
        guard.retain(|r| !ids.contains(&r.id));
        Ok(before - guard.len())
    }
}

/// Ordered persistence backends: an optional primary recorder, then the capped list store.
#[derive(Clone)]
pub struct Storage {
    pub primary: Option<Arc<dyn PracticeRecordRepository>>,
    pub fallback: Arc<dyn PracticeRecordRepository>,
}

impl Storage {
    /// Storage with no primary recorder, only a capped in-memory list.
    #[must_use]
    pub fn in_memory(cap: usize) -> Self {
        Self {
            primary: None,
            fallback: Arc::new(InMemoryRepository::capped(cap)),
        }
    }

    /// Backends in the order they should be tried.
    #[must_use]
    pub fn backends(&self) -> Vec<Arc<dyn PracticeRecordRepository>> {
        self.primary
            .iter()
            .cloned()
            .chain(std::iter::once(Arc::clone(&self.fallback)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use suite_core::model::{ExerciseId, RecordSource, ScoreInfo};
    use suite_core::time::fixed_now;

    fn record(id: &str, minutes: i64) -> PracticeRecord {
        PracticeRecord {
            id: RecordId::new(id),
            exercise_id: ExerciseId::new("p1"),
            session_id: None,
            title: format!("Record {id}"),
            source: RecordSource::Standalone,
            score: ScoreInfo::from_counts(1, 2),
            answers: BTreeMap::new(),
            comparison: BTreeMap::new(),
            spelling_errors: Vec::new(),
            duration_secs: 60,
            started_at: fixed_now(),
            recorded_at: fixed_now() + Duration::minutes(minutes),
            suite_entries: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn capped_store_evicts_oldest_first() {
        let repo = InMemoryRepository::capped(2);
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            repo.save_record(&record(id, i as i64)).await.unwrap();
        }
        let ids: Vec<_> = repo
            .list_records()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![RecordId::new("b"), RecordId::new("c")]);
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let repo = InMemoryRepository::new();
        repo.save_record(&record("a", 0)).await.unwrap();
        let mut updated = record("a", 5);
        updated.title = "Updated".into();
        repo.save_record(&updated).await.unwrap();

        let records = repo.list_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Updated");
    }

    #[tokio::test]
    async fn unavailable_repo_rejects_operations() {
        let repo = InMemoryRepository::new();
        repo.set_unavailable(true);
        let err = repo.save_record(&record("a", 0)).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        repo.set_unavailable(false);
        assert!(repo.list_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_counts_only_existing_records() {
        let repo = InMemoryRepository::new();
        repo.save_record(&record("a", 0)).await.unwrap();
        let removed = repo
            .delete_records(&[RecordId::new("a"), RecordId::new("missing")])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn backends_put_primary_first() {
        let storage = Storage {
            primary: Some(Arc::new(InMemoryRepository::new())),
            fallback: Arc::new(InMemoryRepository::capped(3)),
        };
        let names: Vec<_> = storage.backends().iter().map(|b| b.backend_name()).collect();
        assert_eq!(names, vec!["memory", "list_store"]);
        assert_eq!(Storage::in_memory(3).backends().len(), 1);
    }
}
