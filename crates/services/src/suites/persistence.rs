use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use storage::repository::{PracticeRecordRepository, Storage};
use suite_core::model::{ExerciseId, PracticeRecord, RecordId};
use tracing::{debug, info, warn};

use crate::error::{BackendFailure, PersistenceError};

/// Outcome of a successful save.
#[derive(Debug)]
pub struct SaveReport {
    pub record_id: RecordId,
    /// Backend that accepted the record.
    pub backend: &'static str,
    /// Backends tried before it, with their errors.
    pub skipped: Vec<BackendFailure>,
    /// Redundant constituent records removed afterwards.
    pub cleaned: usize,
}

/// Best-effort write path over an ordered chain of backends.
///
/// Each backend is tried in turn until one accepts the record; the first is the primary
/// recorder when one is configured, the last the capped list store.
#[derive(Clone)]
pub struct PersistenceGateway {
    backends: Vec<Arc<dyn PracticeRecordRepository>>,
    cleanup_window: Duration,
}

impl PersistenceGateway {
    #[must_use]
    pub fn new(backends: Vec<Arc<dyn PracticeRecordRepository>>, cleanup_window: Duration) -> Self {
        Self {
            backends,
            cleanup_window,
        }
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, cleanup_window: Duration) -> Self {
        Self::new(storage.backends(), cleanup_window)
    }

    /// Store `record`, then purge the individually saved records it supersedes.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` when no backend accepted the record. Cleanup failures
    /// are logged and never returned.
    pub async fn save(&self, record: &PracticeRecord) -> Result<SaveReport, PersistenceError> {
        let mut report = self.store(record).await?;
        if record.is_aggregate() {
            report.cleaned = self.cleanup_constituents(record).await;
        }
        Ok(report)
    }

    /// Store `record` without any cleanup (individual fallback records).
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` when no backend accepted the record.
    pub async fn store(&self, record: &PracticeRecord) -> Result<SaveReport, PersistenceError> {
        if self.backends.is_empty() {
            return Err(PersistenceError::NoBackends);
        }
        let mut skipped = Vec::new();
        for backend in &self.backends {
            match backend.save_record(record).await {
                Ok(()) => {
                    info!(
                        record_id = %record.id,
                        backend = backend.backend_name(),
                        "practice record saved"
                    );
                    return Ok(SaveReport {
                        record_id: record.id.clone(),
                        backend: backend.backend_name(),
                        skipped,
                        cleaned: 0,
                    });
                }
                Err(source) => {
                    warn!(
                        record_id = %record.id,
                        backend = backend.backend_name(),
                        error = %source,
                        "backend rejected record; trying next"
                    );
                    skipped.push(BackendFailure {
                        backend: backend.backend_name(),
                        source,
                    });
                }
            }
        }
        Err(PersistenceError::AllBackendsFailed(skipped))
    }

    /// Every readable record across backends, deduplicated by id, oldest first.
    /// Unreadable backends are skipped.
    pub async fn list_records(&self) -> Vec<PracticeRecord> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for backend in &self.backends {
            match backend.list_records().await {
                Ok(records) => {
                    for record in records {
                        if seen.insert(record.id.clone()) {
                            out.push(record);
                        }
                    }
                }
                Err(err) => {
                    debug!(backend = backend.backend_name(), error = %err, "backend not readable");
                }
            }
        }
        out.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        out
    }

    /// Remove individually persisted records already folded into `record`.
    /// Returns how many were removed; failures are logged only.
    pub async fn cleanup_constituents(&self, record: &PracticeRecord) -> usize {
        let matcher = ConstituentMatcher::new(record, self.cleanup_window);
        let mut removed = 0;
        for backend in &self.backends {
            let candidates = match backend.list_records().await {
                Ok(records) => records,
                Err(err) => {
                    debug!(backend = backend.backend_name(), error = %err, "cleanup skipped backend");
                    continue;
                }
            };
            let doomed: Vec<RecordId> = candidates
                .iter()
                .filter(|candidate| matcher.matches(candidate))
                .map(|candidate| candidate.id.clone())
                .collect();
            if doomed.is_empty() {
                continue;
            }
            match backend.delete_records(&doomed).await {
                Ok(n) => {
                    removed += n;
                    debug!(backend = backend.backend_name(), removed = n, "constituent records purged");
                }
                Err(err) => {
                    warn!(backend = backend.backend_name(), error = %err, "constituent cleanup failed");
                }
            }
        }
        removed
    }
}

/// Decides whether a stored record is a redundant constituent of an aggregate.
pub struct ConstituentMatcher<'a> {
    aggregate: &'a PracticeRecord,
    exercise_ids: HashSet<ExerciseId>,
    mean_timestamp: Option<DateTime<Utc>>,
    window: chrono::Duration,
}

impl<'a> ConstituentMatcher<'a> {
    #[must_use]
    pub fn new(aggregate: &'a PracticeRecord, window: Duration) -> Self {
        let exercise_ids = aggregate
            .suite_entries
            .iter()
            .map(|e| e.exercise_id.clone())
            .collect();
        Self {
            aggregate,
            exercise_ids,
            mean_timestamp: mean_timestamp(
                aggregate.suite_entries.iter().map(|e| e.completed_at),
            ),
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
        }
    }

    #[must_use]
    pub fn matches(&self, candidate: &PracticeRecord) -> bool {
        if candidate.id == self.aggregate.id || candidate.is_aggregate() {
            return false;
        }
        match (&candidate.session_id, &self.aggregate.session_id) {
            (Some(candidate_session), Some(session)) => candidate_session == session,
            (Some(_), None) => false,
            (None, _) => {
                self.exercise_ids.contains(&candidate.exercise_id)
                    && self.mean_timestamp.is_some_and(|mean| {
                        let delta = candidate.recorded_at - mean;
                        delta.abs() <= self.window
                    })
            }
        }
    }
}

fn mean_timestamp(stamps: impl Iterator<Item = DateTime<Utc>>) -> Option<DateTime<Utc>> {
    let mut count: i128 = 0;
    let mut sum: i128 = 0;
    for stamp in stamps {
        sum += i128::from(stamp.timestamp_millis());
        count += 1;
    }
    if count == 0 {
        return None;
    }
    i64::try_from(sum / count)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::collections::BTreeMap;
    use serde_json::Map;
    use storage::repository::InMemoryRepository;
    use suite_core::model::{RecordSource, ResultEntry, ScoreInfo, SessionId};
    use suite_core::time::fixed_now;

    const WINDOW: Duration = Duration::from_secs(30 * 60);

    fn entry(exercise: &str) -> ResultEntry {
        ResultEntry {
            entry_key: exercise.into(),
            exercise_id: ExerciseId::new(exercise),
            sub_id: None,
            title: exercise.into(),
            score: ScoreInfo::from_counts(1, 2),
            answers: BTreeMap::new(),
            comparison: BTreeMap::new(),
            spelling_errors: Vec::new(),
            duration_secs: 60,
            completed_at: fixed_now(),
            metadata: Map::new(),
            persisted: false,
        }
    }

    fn individual(id: &str, exercise: &str, session: Option<&str>, minutes: i64) -> PracticeRecord {
        let mut record = PracticeRecord::from_entry(
            RecordId::new(id),
            session.map(SessionId::new),
            &entry(exercise),
            RecordSource::Standalone,
            fixed_now() + ChronoDuration::minutes(minutes),
        );
        record.exercise_id = ExerciseId::new(exercise);
        record
    }

    fn aggregate() -> PracticeRecord {
        let mut record = individual("agg", "suite", Some("s1"), 0);
        record.source = RecordSource::SuiteMode;
        record.suite_entries = vec![entry("p1"), entry("p2")];
        record
    }

    #[test]
    fn matcher_rules() {
        let agg = aggregate();
        let matcher = ConstituentMatcher::new(&agg, WINDOW);

        assert!(matcher.matches(&individual("a", "zzz", Some("s1"), 500)));
        assert!(!matcher.matches(&individual("b", "p1", Some("other"), 0)));
        assert!(matcher.matches(&individual("c", "p1", None, 20)));
        assert!(!matcher.matches(&individual("d", "p1", None, 45)));
        assert!(!matcher.matches(&individual("e", "p3", None, 0)));
        assert!(!matcher.matches(&agg));

        let mut other_aggregate = individual("f", "p1", Some("s1"), 0);
        other_aggregate.source = RecordSource::MultiSuite;
        assert!(!matcher.matches(&other_aggregate));
    }

    #[tokio::test]
    async fn falls_back_when_primary_unavailable() {
        let primary = InMemoryRepository::new();
        primary.set_unavailable(true);
        let fallback = InMemoryRepository::capped(10);
        let gateway = PersistenceGateway::new(
            vec![Arc::new(primary.clone()), Arc::new(fallback.clone())],
            WINDOW,
        );

        let report = gateway.save(&aggregate()).await.unwrap();
        assert_eq!(report.backend, "list_store");
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(fallback.list_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fails_when_every_backend_fails() {
        let only = InMemoryRepository::new();
        only.set_unavailable(true);
        let gateway = PersistenceGateway::new(vec![Arc::new(only)], WINDOW);
        let err = gateway.save(&aggregate()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::AllBackendsFailed(ref f) if f.len() == 1));

        let empty = PersistenceGateway::new(Vec::new(), WINDOW);
        assert!(matches!(
            empty.store(&aggregate()).await,
            Err(PersistenceError::NoBackends)
        ));
    }

    #[tokio::test]
    async fn save_purges_constituents_but_keeps_aggregates() {
        let repo = InMemoryRepository::new();
        repo.save_record(&individual("p1-rec", "p1", Some("s1"), 0)).await.unwrap();
        repo.save_record(&individual("loose", "p2", None, 5)).await.unwrap();
        repo.save_record(&individual("unrelated", "p9", None, 5)).await.unwrap();
        let mut older = aggregate();
        older.id = RecordId::new("older-agg");
        repo.save_record(&older).await.unwrap();

        let gateway = PersistenceGateway::new(vec![Arc::new(repo.clone())], WINDOW);
        let report = gateway.save(&aggregate()).await.unwrap();
        assert_eq!(report.cleaned, 2);

        let mut ids: Vec<_> = repo
            .list_records()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id.as_str().to_owned())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["agg", "older-agg", "unrelated"]);
    }

    #[tokio::test]
    async fn list_records_merges_backends() {
        let a = InMemoryRepository::new();
        let b = InMemoryRepository::capped(5);
        a.save_record(&individual("x", "p1", None, 2)).await.unwrap();
        b.save_record(&individual("x", "p1", None, 2)).await.unwrap();
        b.save_record(&individual("y", "p1", None, 1)).await.unwrap();
        let gateway = PersistenceGateway::new(vec![Arc::new(a), Arc::new(b)], WINDOW);

        let ids: Vec<_> = gateway
            .list_records()
            .await
            .into_iter()
            .map(|r| r.id.as_str().to_owned())
            .collect();
        assert_eq!(ids, vec!["y", "x"]);
    }
}
