//! Multi-suite runs: sub-suites of one exercise report independently and in any order.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use suite_core::model::{
    ExerciseId, ResultEntry, SessionId, SessionStatus, SuiteSettings, TransitionError,
};
use tracing::{debug, error, info, warn};

use super::aggregate::{AggregateInput, build_multi_suite_record};
use super::context::{LifecycleEvent, NoticeLevel};
use super::normalize::{CompletionPayload, EntryTarget, ResultNormalizer};
use super::single::{CoordinatorDeps, SessionSummary};
use crate::error::SuiteError;

const SUITE_MARKERS: [&str; 4] = ["_set", "-set", "_suite", "-suite"];
const FINISHED_MEMORY: usize = 32;

/// Base exercise id of a sub-suite id: `reading-7_set3` and `reading-7-suite-3` both
/// map to `reading-7`. Ids without a suffix are their own base.
#[must_use]
pub fn derive_base_id(raw: &str) -> String {
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    for marker in SUITE_MARKERS {
        if let Some(at) = lower.rfind(marker) {
            let rest = lower[at + marker.len()..].trim_start_matches(['_', '-']);
            if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) && at > 0 {
                return raw[..at].to_string();
            }
        }
    }
    raw.to_string()
}

/// Display label for a base id, falling back to the configured one.
fn type_label_for<'a>(base_id: &str, fallback: &'a str) -> &'a str {
    let lower = base_id.to_ascii_lowercase();
    if lower.starts_with("listening") {
        "Listening"
    } else if lower.starts_with("reading") {
        "Reading"
    } else {
        fallback
    }
}

/// State of one multi-suite session.
#[derive(Debug, Clone)]
pub struct MultiSuiteSession {
    id: SessionId,
    base_id: String,
    status: SessionStatus,
    expected_suite_count: Option<u32>,
    results: Vec<ResultEntry>,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl MultiSuiteSession {
    fn new(base_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::generate_multi(),
            base_id,
            status: SessionStatus::Active,
            expected_suite_count: None,
            results: Vec::new(),
            started_at: now,
            last_activity: now,
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn expected_suite_count(&self) -> Option<u32> {
        self.expected_suite_count
    }

    #[must_use]
    pub fn results(&self) -> &[ResultEntry] {
        &self.results
    }

    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// True once a known, positive expected count has been reached.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.expected_suite_count
            .is_some_and(|expected| expected > 0 && self.results.len() >= expected as usize)
    }

    fn has_sub(&self, sub_id: &str) -> bool {
        self.results.iter().any(|r| r.sub_id.as_deref() == Some(sub_id))
    }

    fn transition(&mut self, to: SessionStatus) -> Result<(), TransitionError> {
        self.status = self.status.transition(to)?;
        debug!(session_id = %self.id, status = %self.status, "multi-suite session transition");
        Ok(())
    }

    fn summary(&self, record_id: Option<suite_core::model::RecordId>) -> SessionSummary {
        let unsaved = if record_id.is_some() { 0 } else { self.results.len() };
        SessionSummary {
            session_id: self.id.clone(),
            status: self.status,
            entries: self.results.len(),
            record_id,
            individually_saved: 0,
            unsaved,
        }
    }
}

/// Expected sub-suite count: the payload's own field, then its metadata, then the
/// configured naming hints.
fn resolve_expected(payload: &CompletionPayload, base_id: &str, settings: &SuiteSettings) -> Option<u32> {
    payload
        .total_suites()
        .or_else(|| payload.metadata_suite_count())
        .or_else(|| {
            settings
                .suite_count_hints()
                .iter()
                .find(|hint| hint.matches(base_id))
                .map(|hint| hint.count)
        })
}

/// Sub-suite ids of a session that finalized recently, so late redeliveries of them
/// are not mistaken for the start of a new run.
#[derive(Debug, Clone)]
struct FinishedSubs {
    sub_ids: BTreeSet<String>,
    finished_at: DateTime<Utc>,
}

/// What a sub-suite completion did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubCompletionStep {
    /// Recorded; more sub-suites are expected (or the count is unknown).
    Recorded {
        session_id: SessionId,
        received: usize,
        expected: Option<u32>,
    },
    /// This sub-suite was already recorded.
    Duplicate,
    /// The last expected sub-suite arrived and the session was finalized.
    Ended(SessionSummary),
}

/// Gathers sub-suite results per base exercise id.
pub struct MultiSuiteCoordinator {
    deps: CoordinatorDeps,
    sessions: BTreeMap<String, MultiSuiteSession>,
    failed: BTreeMap<String, MultiSuiteSession>,
    finished: BTreeMap<String, FinishedSubs>,
}

impl MultiSuiteCoordinator {
    #[must_use]
    pub fn new(deps: CoordinatorDeps) -> Self {
        Self {
            deps,
            sessions: BTreeMap::new(),
            failed: BTreeMap::new(),
            finished: BTreeMap::new(),
        }
    }

    /// Running session for the base id of `raw_exercise_id`.
    #[must_use]
    pub fn session(&self, raw_exercise_id: &str) -> Option<&MultiSuiteSession> {
        self.sessions.get(&derive_base_id(raw_exercise_id))
    }

    /// Session whose finalization failed and awaits a retry.
    #[must_use]
    pub fn failed_session(&self, raw_exercise_id: &str) -> Option<&MultiSuiteSession> {
        self.failed.get(&derive_base_id(raw_exercise_id))
    }

    pub fn sessions(&self) -> impl Iterator<Item = &MultiSuiteSession> {
        self.sessions.values()
    }

    /// The running session for this exercise's base id, created on first use.
    pub fn get_or_create(&mut self, raw_exercise_id: &str) -> &mut MultiSuiteSession {
        let base_id = derive_base_id(raw_exercise_id);
        let now = self.deps.clock.now();
        let notifier = &self.deps.notifier;
        self.sessions.entry(base_id).or_insert_with_key(|base_id| {
            let session = MultiSuiteSession::new(base_id.clone(), now);
            info!(session_id = %session.id, base_id, "multi-suite session started");
            notifier.lifecycle(LifecycleEvent::Started {
                session_id: session.id.clone(),
            });
            session
        })
    }

    /// Record one sub-suite result, finalizing when the expected count is reached.
    ///
    /// # Errors
    ///
    /// Returns `SuiteError::MissingSubId` when the payload names no sub-suite, or a
    /// transition error if the session is in an unexpected state. Persistence failures
    /// leave the session in `Error` and are reported through the summary.
    pub async fn on_sub_completion(
        &mut self,
        raw_exercise_id: &ExerciseId,
        payload: &CompletionPayload,
    ) -> Result<SubCompletionStep, SuiteError> {
        let sub_id = payload.suite_id().ok_or(SuiteError::MissingSubId)?;
        let now = self.deps.clock.now();
        let settings = self.deps.settings.clone();
        let base_id = derive_base_id(raw_exercise_id.as_str());
        if !self.sessions.contains_key(&base_id) && self.already_finished(&base_id, &sub_id, now) {
            debug!(base_id, sub_id, "sub-suite of a finished session delivered again");
            return Ok(SubCompletionStep::Duplicate);
        }
        self.finished.remove(&base_id);
        let session = self.get_or_create(raw_exercise_id.as_str());

        if session.has_sub(&sub_id) {
            debug!(session_id = %session.id, sub_id, "duplicate sub-suite completion ignored");
            return Ok(SubCompletionStep::Duplicate);
        }

        let entry_key = sub_id.clone();
        let fallback_title = format!("{} #{sub_id}", session.base_id);
        let entry = ResultNormalizer::normalize(
            payload,
            &EntryTarget {
                entry_key: &entry_key,
                exercise_id: raw_exercise_id,
                sub_id: Some(&sub_id),
                fallback_title: &fallback_title,
                completed_at: now,
            },
        );
        session.results.push(entry);
        session.last_activity = now;
        if session.expected_suite_count.is_none() {
            session.expected_suite_count = resolve_expected(payload, &session.base_id, &settings);
        }
        info!(
            session_id = %session.id,
            base_id = %session.base_id,
            sub_id,
            received = session.results.len(),
            expected = ?session.expected_suite_count,
            "sub-suite recorded"
        );

        if !session.is_complete() {
            return Ok(SubCompletionStep::Recorded {
                session_id: session.id.clone(),
                received: session.results.len(),
                expected: session.expected_suite_count,
            });
        }
        let base_id = session.base_id.clone();
        match self.sessions.remove(&base_id) {
            Some(session) => self.finalize(session).await.map(SubCompletionStep::Ended),
            None => Ok(SubCompletionStep::Duplicate),
        }
    }

    /// Finalize whatever arrived for this base id, whether or not the count is known.
    ///
    /// # Errors
    ///
    /// `SuiteError::UnknownMultiSession` if nothing runs for the base id,
    /// `SuiteError::NothingToFinalize` if no sub-suite arrived yet.
    pub async fn finalize_now(&mut self, raw_exercise_id: &str) -> Result<SessionSummary, SuiteError> {
        let base_id = derive_base_id(raw_exercise_id);
        match self.sessions.get(&base_id) {
            None => return Err(SuiteError::UnknownMultiSession(base_id)),
            Some(session) if session.results.is_empty() => {
                return Err(SuiteError::NothingToFinalize(base_id));
            }
            Some(_) => {}
        }
        match self.sessions.remove(&base_id) {
            Some(session) => self.finalize(session).await,
            None => Err(SuiteError::UnknownMultiSession(base_id)),
        }
    }

    /// Finalize sessions with an unknown expected count that have been idle for the
    /// configured duration. Does nothing when no idle timeout is configured.
    pub async fn sweep_idle(&mut self) -> Vec<SessionSummary> {
        let Some(idle) = self.deps.settings.multi_idle_finalize_after() else {
            return Vec::new();
        };
        let Ok(idle) = chrono::Duration::from_std(idle) else {
            return Vec::new();
        };
        let now = self.deps.clock.now();
        let stale: Vec<String> = self
            .sessions
            .values()
            .filter(|s| {
                s.expected_suite_count.is_none()
                    && !s.results.is_empty()
                    && now - s.last_activity >= idle
            })
            .map(|s| s.base_id.clone())
            .collect();

        let mut summaries = Vec::new();
        for base_id in stale {
            let Some(session) = self.sessions.remove(&base_id) else {
                continue;
            };
            info!(session_id = %session.id, base_id, "finalizing idle multi-suite session");
            match self.finalize(session).await {
                Ok(summary) => summaries.push(summary),
                Err(err) => warn!(base_id, error = %err, "idle finalize failed"),
            }
        }
        summaries
    }

    /// Persist a session whose earlier finalization failed.
    ///
    /// # Errors
    ///
    /// `SuiteError::UnknownMultiSession` when no failed session exists for the base id.
    pub async fn retry(&mut self, raw_exercise_id: &str) -> Result<SessionSummary, SuiteError> {
        let base_id = derive_base_id(raw_exercise_id);
        let session = self
            .failed
            .remove(&base_id)
            .ok_or(SuiteError::UnknownMultiSession(base_id))?;
        self.finalize(session).await
    }

    /// True when `sub_id` belongs to a session of `base_id` that was finalized within
    /// the redelivery window, or to one parked after a failed finalization.
    fn already_finished(&self, base_id: &str, sub_id: &str, now: DateTime<Utc>) -> bool {
        if self.failed.get(base_id).is_some_and(|s| s.has_sub(sub_id)) {
            return true;
        }
        let window = chrono::Duration::from_std(self.deps.settings.redelivery_window())
            .unwrap_or(chrono::Duration::MAX);
        self.finished.get(base_id).is_some_and(|finished| {
            now - finished.finished_at <= window && finished.sub_ids.contains(sub_id)
        })
    }

    fn remember_finished(&mut self, session: &MultiSuiteSession, now: DateTime<Utc>) {
        let window = chrono::Duration::from_std(self.deps.settings.redelivery_window())
            .unwrap_or(chrono::Duration::MAX);
        self.finished.retain(|_, finished| now - finished.finished_at <= window);
        self.finished.insert(
            session.base_id.clone(),
            FinishedSubs {
                sub_ids: session.results.iter().filter_map(|r| r.sub_id.clone()).collect(),
                finished_at: now,
            },
        );
        while self.finished.len() > FINISHED_MEMORY {
            let Some(oldest) = self
                .finished
                .iter()
                .min_by_key(|(_, finished)| finished.finished_at)
                .map(|(base_id, _)| base_id.clone())
            else {
                break;
            };
            self.finished.remove(&oldest);
        }
    }

    /// Drop every running session without saving. Failed sessions stay for retry.
    pub fn shutdown(&mut self) {
        for (base_id, session) in std::mem::take(&mut self.sessions) {
            debug!(session_id = %session.id, base_id, received = session.results.len(), "multi-suite session dropped");
        }
    }

    /// Aggregate and store one removed session. Failures park it in `failed`.
    async fn finalize(&mut self, mut session: MultiSuiteSession) -> Result<SessionSummary, SuiteError> {
        match session.transition(SessionStatus::Finalizing) {
            Ok(()) => {}
            Err(err) => {
                self.failed.insert(session.base_id.clone(), session);
                return Err(err.into());
            }
        }

        let record = build_multi_suite_record(
            &AggregateInput {
                session_id: &session.id,
                started_at: session.started_at,
                finished_at: self.deps.clock.now(),
                entries: &session.results,
                type_label: type_label_for(&session.base_id, self.deps.settings.type_label()),
            },
            &session.base_id,
            session.expected_suite_count,
        );

        match self.deps.gateway.save(&record).await {
            Ok(report) => {
                session.transition(SessionStatus::Completed)?;
                self.remember_finished(&session, self.deps.clock.now());
                info!(
                    session_id = %session.id,
                    base_id = %session.base_id,
                    record_id = %report.record_id,
                    "multi-suite session completed"
                );
                self.deps.notifier.lifecycle(LifecycleEvent::Completed {
                    session_id: session.id.clone(),
                    record_id: report.record_id.clone(),
                });
                Ok(session.summary(Some(report.record_id)))
            }
            Err(err) => {
                if let Err(transition) = session.transition(SessionStatus::Error) {
                    warn!(session_id = %session.id, error = %transition, "error transition skipped");
                }
                error!(
                    session_id = %session.id,
                    base_id = %session.base_id,
                    error = %err,
                    "multi-suite aggregate not saved; kept for retry"
                );
                self.deps.notifier.notify(
                    NoticeLevel::Error,
                    "Your multi-suite results could not be saved; they are kept and can be retried.",
                );
                let summary = session.summary(None);
                self.failed.insert(session.base_id.clone(), session);
                Ok(summary)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suites::persistence::PersistenceGateway;
    use crate::suites::sim::{RecordingSink, SimBrowser, sub_suite_payload};
    use std::sync::Arc;
    use std::time::Duration;
    use storage::repository::{InMemoryRepository, PracticeRecordRepository};
    use suite_core::Clock;
    use suite_core::model::{PracticeRecord, RecordId, SuiteSettingsDraft};
    use suite_core::time::fixed_now;

    fn coordinator_with(settings: SuiteSettings, clock: Clock) -> (MultiSuiteCoordinator, InMemoryRepository, Arc<RecordingSink>) {
        let repo = InMemoryRepository::new();
        let sink = RecordingSink::new();
        let gateway = PersistenceGateway::new(vec![Arc::new(repo.clone())], settings.cleanup_window());
        let coordinator = MultiSuiteCoordinator::new(CoordinatorDeps {
            opener: SimBrowser::new(),
            gateway,
            notifier: sink.clone(),
            settings,
            clock,
        });
        (coordinator, repo, sink)
    }

    fn coordinator() -> (MultiSuiteCoordinator, InMemoryRepository, Arc<RecordingSink>) {
        coordinator_with(SuiteSettings::default(), Clock::manual(fixed_now()))
    }

    fn payload(suite_id: u32, total_suites: Option<u32>, correct: u32) -> CompletionPayload {
        CompletionPayload::parse(&sub_suite_payload(suite_id, total_suites, correct, 10))
    }

    #[test]
    fn base_id_strips_suite_suffixes() {
        assert_eq!(derive_base_id("reading-7_set3"), "reading-7");
        assert_eq!(derive_base_id("reading-7-SET-12"), "reading-7");
        assert_eq!(derive_base_id("listening-100-p1_suite2"), "listening-100-p1");
        assert_eq!(derive_base_id("listening-100-p1"), "listening-100-p1");
        assert_eq!(derive_base_id("reading_settings"), "reading_settings");
        assert_eq!(derive_base_id("_set1"), "_set1");
    }

    #[test]
    fn expected_count_priority() {
        let settings = SuiteSettings::default();
        let explicit = CompletionPayload::parse(&serde_json::json!({
            "suiteId": 1, "totalSuites": 4, "metadata": { "suiteCount": 6 }
        }));
        assert_eq!(resolve_expected(&explicit, "listening-100-p1", &settings), Some(4));

        let metadata = CompletionPayload::parse(&serde_json::json!({
            "suiteId": 1, "metadata": { "suiteCount": 6 }
        }));
        assert_eq!(resolve_expected(&metadata, "listening-100-p1", &settings), Some(6));

        let bare = CompletionPayload::parse(&serde_json::json!({ "suiteId": 1 }));
        assert_eq!(resolve_expected(&bare, "listening-100-p1", &settings), Some(10));
        assert_eq!(resolve_expected(&bare, "reading-7", &settings), None);
    }

    #[tokio::test]
    async fn completes_exactly_at_expected_count() {
        let (mut multi, repo, _) = coordinator();
        let id = ExerciseId::new("listening-100-p1");

        for suite_id in 1..=9 {
            let total = (suite_id == 1).then_some(10);
            let step = multi.on_sub_completion(&id, &payload(suite_id, total, 7)).await.unwrap();
            assert!(matches!(step, SubCompletionStep::Recorded { received, .. } if received == suite_id as usize));
        }
        assert!(repo.list_records().await.unwrap().is_empty());

        let step = multi.on_sub_completion(&id, &payload(10, None, 7)).await.unwrap();
        let SubCompletionStep::Ended(summary) = step else {
            panic!("expected finalization on the tenth sub-suite");
        };
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.entries, 10);
        assert!(multi.session("listening-100-p1").is_none());

        let records = repo.list_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].score.correct, 70);
        assert_eq!(records[0].score.total, 100);
        assert!(records[0].title.starts_with("Listening multi-suite listening-100-p1"));
    }

    #[tokio::test]
    async fn redelivered_sub_suite_after_completion_is_a_duplicate() {
        let (mut multi, repo, sink) = coordinator();
        let id = ExerciseId::new("listening-100-p1");
        for suite_id in 1..=10 {
            multi.on_sub_completion(&id, &payload(suite_id, None, 7)).await.unwrap();
        }
        assert_eq!(repo.list_records().await.unwrap().len(), 1);

        let again = multi.on_sub_completion(&id, &payload(10, None, 7)).await.unwrap();
        assert_eq!(again, SubCompletionStep::Duplicate);
        assert!(multi.session("listening-100-p1").is_none());
        assert_eq!(multi.sessions().count(), 0);
        let started = sink
            .events()
            .iter()
            .filter(|e| matches!(e, LifecycleEvent::Started { .. }))
            .count();
        assert_eq!(started, 1);
        assert_eq!(repo.list_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unseen_sub_id_after_completion_starts_a_fresh_session() {
        let mut clock = Clock::manual(fixed_now());
        let (mut multi, repo, _) = coordinator_with(SuiteSettings::default(), clock.clone());
        let id = ExerciseId::new("reading-7_set1");
        multi.on_sub_completion(&id, &payload(1, None, 5)).await.unwrap();
        multi.on_sub_completion(&id, &payload(2, None, 5)).await.unwrap();
        multi.finalize_now("reading-7").await.unwrap();

        assert_eq!(
            multi.on_sub_completion(&id, &payload(2, None, 5)).await.unwrap(),
            SubCompletionStep::Duplicate
        );
        let step = multi.on_sub_completion(&id, &payload(3, None, 5)).await.unwrap();
        assert!(matches!(step, SubCompletionStep::Recorded { received: 1, .. }));
        multi.finalize_now("reading-7").await.unwrap();
        assert_eq!(repo.list_records().await.unwrap().len(), 2);

        clock.advance(chrono::Duration::minutes(6));
        let step = multi.on_sub_completion(&id, &payload(3, None, 5)).await.unwrap();
        assert!(matches!(step, SubCompletionStep::Recorded { received: 1, .. }));
    }

    #[tokio::test]
    async fn missing_sub_id_and_duplicates() {
        let (mut multi, _, _) = coordinator();
        let id = ExerciseId::new("reading-7");
        let bare = CompletionPayload::parse(&serde_json::json!({ "correct": 1, "total": 2 }));
        assert!(matches!(
            multi.on_sub_completion(&id, &bare).await,
            Err(SuiteError::MissingSubId)
        ));

        multi.on_sub_completion(&id, &payload(1, None, 5)).await.unwrap();
        let step = multi.on_sub_completion(&id, &payload(1, None, 9)).await.unwrap();
        assert_eq!(step, SubCompletionStep::Duplicate);
        assert_eq!(multi.session("reading-7").unwrap().results().len(), 1);
    }

    #[tokio::test]
    async fn unknown_count_never_auto_completes_but_can_be_finalized() {
        let (mut multi, repo, _) = coordinator();
        let id = ExerciseId::new("reading-7_set1");
        for suite_id in 1..=5 {
            multi.on_sub_completion(&id, &payload(suite_id, None, 5)).await.unwrap();
        }
        let session = multi.session("reading-7").unwrap();
        assert_eq!(session.expected_suite_count(), None);
        assert!(!session.is_complete());

        assert!(matches!(
            multi.finalize_now("reading-8").await,
            Err(SuiteError::UnknownMultiSession(_))
        ));
        let summary = multi.finalize_now("reading-7").await.unwrap();
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(repo.list_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn idle_sweep_finalizes_stale_unknown_sessions() {
        let settings = SuiteSettingsDraft {
            multi_idle_finalize_after: Some(Duration::from_secs(600)),
            ..SuiteSettingsDraft::default()
        }
        .validate()
        .unwrap();
        let mut clock = Clock::manual(fixed_now());
        let (mut multi, repo, _) = coordinator_with(settings, clock.clone());

        multi
            .on_sub_completion(&ExerciseId::new("reading-7"), &payload(1, None, 5))
            .await
            .unwrap();
        clock.advance(chrono::Duration::minutes(5));
        assert!(multi.sweep_idle().await.is_empty());

        clock.advance(chrono::Duration::minutes(6));
        let swept = multi.sweep_idle().await;
        assert_eq!(swept.len(), 1);
        assert_eq!(repo.list_records().await.unwrap().len(), 1);
        assert!(multi.session("reading-7").is_none());
    }

    #[tokio::test]
    async fn failed_finalize_is_kept_for_retry() {
        let (mut multi, repo, sink) = coordinator();
        let id = ExerciseId::new("listening-100-p2");
        repo.set_unavailable(true);
        for suite_id in 1..=10 {
            multi.on_sub_completion(&id, &payload(suite_id, Some(10), 6)).await.unwrap();
        }
        let failed = multi.failed_session("listening-100-p2").unwrap();
        assert_eq!(failed.status(), SessionStatus::Error);
        assert_eq!(failed.results().len(), 10);
        assert_eq!(sink.count(NoticeLevel::Error), 1);

        repo.set_unavailable(false);
        assert!(repo.list_records().await.unwrap().is_empty());
        let summary = multi.retry("listening-100-p2").await.unwrap();
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(repo.list_records().await.unwrap().len(), 1);
        assert!(multi.failed_session("listening-100-p2").is_none());
    }

    async fn run_in_order(order: &[u32]) -> PracticeRecord {
        let (mut multi, repo, _) = coordinator();
        let id = ExerciseId::new("listening-100-p3");
        for suite_id in order {
            let mut raw = sub_suite_payload(*suite_id, Some(4), *suite_id, 10);
            raw["answers"] = serde_json::json!({ "1": format!("a{suite_id}") });
            raw["spellingErrors"] = serde_json::json!([
                { "word": "Necessary", "userInput": format!("nesesary{suite_id}"), "timestamp": 1_000 * suite_id }
            ]);
            multi.on_sub_completion(&id, &CompletionPayload::parse(&raw)).await.unwrap();
        }
        let mut record = repo.list_records().await.unwrap().remove(0);
        record.id = RecordId::new("normalized");
        record.session_id = None;
        record
    }

    #[tokio::test]
    async fn arrival_order_does_not_change_the_record() {
        let forward = run_in_order(&[1, 2, 3, 4]).await;
        let shuffled = run_in_order(&[3, 1, 4, 2]).await;
        assert_eq!(
            serde_json::to_string(&forward).unwrap(),
            serde_json::to_string(&shuffled).unwrap()
        );
        let keys: Vec<_> = forward.answers.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["1::1", "2::1", "3::1", "4::1"]);
        assert_eq!(forward.spelling_errors.len(), 1);
        assert_eq!(forward.spelling_errors[0].error_count, 4);
        assert_eq!(forward.spelling_errors[0].user_input, "nesesary4");
    }
}
