use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use suite_core::model::{PracticeRecord, RecordId};
use tokio::sync::Mutex;

use crate::repository::{PracticeRecordRepository, StorageError, upsert_capped};

/// Capped list store kept as a JSON array on disk.
///
/// Every write rewrites the whole file through a sibling temp file and a rename, so
/// a crash mid-write leaves the previous list intact.
#[derive(Clone)]
pub struct JsonListRepository {
    path: PathBuf,
    cap: usize,
    lock: Arc<Mutex<()>>,
}

impl JsonListRepository {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            path: path.into(),
            cap: cap.max(1),
            lock: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, err: &std::io::Error) -> StorageError {
        StorageError::Unavailable(format!("{}: {err}", self.path.display()))
    }

    async fn read(&self) -> Result<Vec<PracticeRecord>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Serialization(e.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(self.unavailable(&err)),
        }
    }

    async fn write(&self, records: &[PracticeRecord]) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.unavailable(&e))?;
        }
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|e| self.unavailable(&e))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| self.unavailable(&e))
    }
}

#[async_trait]
impl PracticeRecordRepository for JsonListRepository {
    fn backend_name(&self) -> &'static str {
        "list_store"
    }

    async fn save_record(&self, record: &PracticeRecord) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await?;
        let evicted = upsert_capped(&mut records, record, Some(self.cap));
        self.write(&records).await?;
        if evicted > 0 {
            tracing::debug!(path = %self.path.display(), evicted, "evicted oldest records");
        }
        Ok(())
    }

    async fn list_records(&self) -> Result<Vec<PracticeRecord>, StorageError> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn delete_records(&self, ids: &[RecordId]) -> Result<usize, StorageError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await?;
        let before = records.len();
        records.retain(|r| !ids.contains(&r.id));
        let removed = before - records.len();
        if removed > 0 {
            self.write(&records).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use suite_core::model::{ExerciseId, RecordSource, ScoreInfo};
    use suite_core::time::fixed_now;

    fn scratch(name: &str) -> PathBuf {
        let path = std::env::temp_dir()
            .join(format!("suite-list-{}-{name}", std::process::id()))
            .join("fallback.json");
        let _ = std::fs::remove_file(&path);
        path
    }

    fn record(id: &str, minutes: i64) -> PracticeRecord {
        PracticeRecord {
            id: RecordId::new(id),
            exercise_id: ExerciseId::new("p1"),
            session_id: None,
            title: format!("Record {id}"),
            source: RecordSource::SuiteFallback,
            score: ScoreInfo::from_counts(3, 4),
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
    async fn records_survive_a_new_handle() {
        let path = scratch("survive");
        let repo = JsonListRepository::new(&path, 10);
        repo.save_record(&record("a", 0)).await.unwrap();
        repo.save_record(&record("b", 1)).await.unwrap();
        drop(repo);

        let reopened = JsonListRepository::new(&path, 10);
        let records = reopened.list_records().await.unwrap();
        assert_eq!(records, vec![record("a", 0), record("b", 1)]);
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let repo = JsonListRepository::new(scratch("missing"), 3);
        assert!(repo.list_records().await.unwrap().is_empty());
        assert_eq!(repo.delete_records(&[RecordId::new("a")]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cap_evicts_oldest_and_save_upserts() {
        let repo = JsonListRepository::new(scratch("cap"), 2);
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            repo.save_record(&record(id, i as i64)).await.unwrap();
        }
        let mut updated = record("c", 9);
        updated.title = "Updated".into();
        repo.save_record(&updated).await.unwrap();

        let records = repo.list_records().await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(records[1].title, "Updated");

        assert_eq!(repo.delete_records(&[RecordId::new("b")]).await.unwrap(), 1);
        assert_eq!(repo.list_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let path = scratch("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ not json").unwrap();
        let repo = JsonListRepository::new(&path, 2);
        assert!(matches!(
            repo.list_records().await,
            Err(StorageError::Serialization(_))
        ));
    }
}
