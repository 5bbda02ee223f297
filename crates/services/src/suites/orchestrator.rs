use std::sync::Arc;

use serde_json::Value;
use storage::repository::Storage;
use suite_core::Clock;
use suite_core::model::{
    ExerciseId, ExerciseRef, PracticeRecord, RecordId, RecordSource, SessionId, SuiteSettings,
};
use tracing::{info, instrument, warn};

use super::context::{ExamIndexProvider, ExerciseOpener, NoticeLevel, NotificationSink};
use super::multi::{MultiSuiteCoordinator, SubCompletionStep};
use super::normalize::{CompletionPayload, EntryTarget, ResultNormalizer};
use super::persistence::{PersistenceGateway, SaveReport};
use super::plan::SuitePlanner;
use super::single::{
    CompletionStep, CoordinatorDeps, SessionSummary, SingleSuiteCoordinator, SingleSuiteSession,
};
use crate::error::SuiteError;

/// Everything the orchestrator needs from the outside world.
pub struct SuiteDeps {
    pub opener: Arc<dyn ExerciseOpener>,
    pub exam_index: Arc<dyn ExamIndexProvider>,
    pub notifier: Arc<dyn NotificationSink>,
    pub storage: Storage,
    pub settings: SuiteSettings,
    pub clock: Clock,
}

/// Where a completion event ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Single(CompletionStep),
    Multi(SubCompletionStep),
    /// Not part of any coordinated session; persist it as a standalone exercise.
    Unowned,
}

/// Single entry point for suite practice: starts sessions, routes completion events,
/// and owns both coordinators and the session registry.
///
/// Methods take `&mut self`; each event is handled to completion before the next.
pub struct SuiteOrchestrator {
    single: SingleSuiteCoordinator,
    multi: MultiSuiteCoordinator,
    exam_index: Arc<dyn ExamIndexProvider>,
    notifier: Arc<dyn NotificationSink>,
    gateway: PersistenceGateway,
    settings: SuiteSettings,
    clock: Clock,
}

impl SuiteOrchestrator {
    #[must_use]
    pub fn new(deps: SuiteDeps) -> Self {
        let gateway = PersistenceGateway::from_storage(&deps.storage, deps.settings.cleanup_window());
        let coordinator_deps = CoordinatorDeps {
            opener: deps.opener,
            gateway: gateway.clone(),
            notifier: Arc::clone(&deps.notifier),
            settings: deps.settings.clone(),
            clock: deps.clock.clone(),
        };
        Self {
            single: SingleSuiteCoordinator::new(coordinator_deps.clone()),
            multi: MultiSuiteCoordinator::new(coordinator_deps),
            exam_index: deps.exam_index,
            notifier: deps.notifier,
            gateway,
            settings: deps.settings,
            clock: deps.clock,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &SuiteSettings {
        &self.settings
    }

    #[must_use]
    pub fn active_suite(&self) -> Option<&SingleSuiteSession> {
        self.single.active()
    }

    #[must_use]
    pub fn single(&self) -> &SingleSuiteCoordinator {
        &self.single
    }

    #[must_use]
    pub fn multi(&self) -> &MultiSuiteCoordinator {
        &self.multi
    }

    /// Build a P1/P2/P3 sequence from the exam index and start it.
    ///
    /// # Errors
    ///
    /// Any startup failure; it has already been shown to the user.
    #[instrument(skip(self))]
    pub async fn start_suite(&mut self) -> Result<SessionId, SuiteError> {
        let result = self.plan_and_start().await;
        self.report(result)
    }

    async fn plan_and_start(&mut self) -> Result<SessionId, SuiteError> {
        if let Some(active) = self.single.active() {
            return Err(SuiteError::AlreadyActive(active.id().clone()));
        }
        let catalog = self.exam_index.get_index().await?;
        let sequence = SuitePlanner::new()
            .with_shuffle(self.settings.shuffle())
            .plan(catalog)?;
        self.single.start(sequence).await
    }

    /// Start a suite over an explicit sequence.
    ///
    /// # Errors
    ///
    /// Any startup failure; it has already been shown to the user.
    #[instrument(skip(self, sequence), fields(exercises = sequence.len()))]
    pub async fn start_sequence(&mut self, sequence: Vec<ExerciseRef>) -> Result<SessionId, SuiteError> {
        let result = self.single.start(sequence).await;
        self.report(result)
    }

    /// Route a completion event: payloads carrying a sub-suite id go to the multi-suite
    /// coordinator, everything else to the single-suite session that owns the exercise.
    ///
    /// # Errors
    ///
    /// Unexpected coordinator failures; they have already been shown to the user.
    #[instrument(skip(self, raw), fields(exercise_id = %exercise_id))]
    pub async fn handle_completion(
        &mut self,
        exercise_id: &ExerciseId,
        raw: &Value,
    ) -> Result<CompletionOutcome, SuiteError> {
        let payload = CompletionPayload::parse(raw);
        let result = if payload.suite_id().is_some() {
            self.multi
                .on_sub_completion(exercise_id, &payload)
                .await
                .map(CompletionOutcome::Multi)
        } else {
            let hint = payload.session_hint().map(SessionId::new);
            match self.single.resolve(exercise_id, hint.as_ref()) {
                None => Ok(CompletionOutcome::Unowned),
                Some(owner) if self.single.active().is_some_and(|s| s.id() == &owner) => self
                    .single
                    .on_completion(exercise_id, &payload)
                    .await
                    .map(CompletionOutcome::Single),
                Some(owner) => {
                    info!(session_id = %owner, "completion for an inactive session ignored");
                    Ok(CompletionOutcome::Single(CompletionStep::NotHandled))
                }
            }
        };
        self.report(result)
    }

    /// Save a completion that no coordinated session owns as its own record.
    ///
    /// # Errors
    ///
    /// `SuiteError::Persistence` when no backend accepted the record.
    #[instrument(skip(self, raw), fields(exercise_id = %exercise.id))]
    pub async fn persist_standalone(
        &self,
        exercise: &ExerciseRef,
        raw: &Value,
    ) -> Result<SaveReport, SuiteError> {
        let payload = CompletionPayload::parse(raw);
        let now = self.clock.now();
        let entry = ResultNormalizer::normalize(
            &payload,
            &EntryTarget {
                entry_key: exercise.id.as_str(),
                exercise_id: &exercise.id,
                sub_id: None,
                fallback_title: &exercise.title,
                completed_at: now,
            },
        );
        let record = PracticeRecord::from_entry(
            RecordId::new(format!("{}@{}", exercise.id, now.timestamp_millis())),
            None,
            &entry,
            RecordSource::Standalone,
            now,
        );
        let result = self.gateway.save(&record).await.map_err(SuiteError::from);
        self.report(result)
    }

    /// Stop the running suite, keeping finished passages as individual records.
    #[instrument(skip(self, skip))]
    pub async fn abort_suite(&mut self, reason: &str, skip: Option<&ExerciseId>) -> Option<SessionSummary> {
        let summary = self.single.abort(reason, skip).await;
        if summary.is_some() {
            self.notifier
                .notify(NoticeLevel::Warning, &format!("Suite practice stopped: {reason}"));
        }
        summary
    }

    /// Finalize a multi-suite session with whatever sub-suites arrived.
    ///
    /// # Errors
    ///
    /// No such session, or nothing to finalize yet.
    #[instrument(skip(self))]
    pub async fn finalize_multi_now(&mut self, exercise_id: &str) -> Result<SessionSummary, SuiteError> {
        let result = self.multi.finalize_now(exercise_id).await;
        self.report(result)
    }

    /// Finalize multi-suite sessions of unknown size that have gone idle.
    #[instrument(skip(self))]
    pub async fn sweep_idle_multi(&mut self) -> Vec<SessionSummary> {
        self.multi.sweep_idle().await
    }

    /// Retry persisting a multi-suite session whose finalization failed.
    ///
    /// # Errors
    ///
    /// No failed session exists for the exercise.
    #[instrument(skip(self))]
    pub async fn retry_multi_finalize(&mut self, exercise_id: &str) -> Result<SessionSummary, SuiteError> {
        let result = self.multi.retry(exercise_id).await;
        self.report(result)
    }

    /// Retry storing suites whose entries no backend accepted earlier.
    #[instrument(skip(self))]
    pub async fn retry_pending_suites(&mut self) -> Vec<SessionSummary> {
        self.single.retry_pending().await
    }

    /// Stored records across all readable backends, newest first.
    pub async fn history(&self) -> Vec<PracticeRecord> {
        let mut records = self.gateway.list_records().await;
        records.reverse();
        records
    }

    /// Tear down everything still running. Nothing is persisted.
    pub fn shutdown(&mut self) {
        self.single.shutdown();
        self.multi.shutdown();
        info!("suite orchestrator shut down");
    }

    /// Show a failure to the user once and hand the result back.
    fn report<T>(&self, result: Result<T, SuiteError>) -> Result<T, SuiteError> {
        if let Err(err) = &result {
            let level = match err {
                SuiteError::AlreadyActive(_)
                | SuiteError::EmptySequence
                | SuiteError::MissingCategory(_)
                | SuiteError::ContextUnavailable(_)
                | SuiteError::NothingToFinalize(_)
                | SuiteError::UnknownMultiSession(_) => NoticeLevel::Warning,
                _ => NoticeLevel::Error,
            };
            warn!(error = %err, "suite operation failed");
            self.notifier.notify(level, &err.user_message());
        }
        result
    }
}
