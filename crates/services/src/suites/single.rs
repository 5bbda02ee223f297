//! Sequential suite runs: one child context walks through P1, P2 and P3.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use suite_core::Clock;
use suite_core::model::{
    CloseAttempt, ExerciseId, ExerciseRef, PracticeRecord, RecordId, RecordSource, ResultEntry,
    SessionId, SessionStatus, SuiteSettings,
};
use tracing::{debug, error, info, warn};

use super::aggregate::{AggregateInput, build_single_suite_record};
use super::context::{
    ChildContext, ChildMessage, ExerciseOpener, LifecycleEvent, NoticeLevel, NotificationSink,
    OpenRequest,
};
use super::guard::{AttemptLog, WindowGuard};
use super::normalize::{CompletionPayload, EntryTarget, ResultNormalizer};
use super::persistence::PersistenceGateway;
use super::registry::{ActiveSuiteView, SessionRegistry};
use crate::error::{OpenError, SuiteError};

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// State of one sequential suite run.
pub struct SingleSuiteSession {
    id: SessionId,
    status: SessionStatus,
    sequence: Vec<ExerciseRef>,
    current_index: usize,
    results: Vec<ResultEntry>,
    started_at: DateTime<Utc>,
    attempts: AttemptLog,
    context: Option<Arc<dyn ChildContext>>,
    hooks_run: bool,
}

impl SingleSuiteSession {
    fn new(sequence: Vec<ExerciseRef>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::generate_suite(),
            status: SessionStatus::Initializing,
            sequence,
            current_index: 0,
            results: Vec::new(),
            started_at,
            attempts: AttemptLog::new(),
            context: None,
            hooks_run: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn sequence(&self) -> &[ExerciseRef] {
        &self.sequence
    }

    /// Index of the exercise the child context is currently showing.
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn current_exercise(&self) -> Option<&ExerciseRef> {
        self.sequence.get(self.current_index)
    }

    #[must_use]
    pub fn results(&self) -> &[ResultEntry] {
        &self.results
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn close_attempts(&self) -> Vec<CloseAttempt> {
        self.attempts.snapshot()
    }

    #[must_use]
    pub fn context(&self) -> Option<&Arc<dyn ChildContext>> {
        self.context.as_ref()
    }

    fn position_of(&self, exercise_id: &ExerciseId) -> Option<usize> {
        self.sequence.iter().position(|e| &e.id == exercise_id)
    }

    fn has_result_for(&self, exercise_id: &ExerciseId) -> bool {
        self.results.iter().any(|r| &r.exercise_id == exercise_id)
    }

    fn transition(&mut self, to: SessionStatus) -> Result<(), SuiteError> {
        self.status = self.status.transition(to)?;
        debug!(session_id = %self.id, status = %self.status, "suite session transition");
        Ok(())
    }

    /// Entries not stored anywhere yet.
    #[must_use]
    pub fn unsaved(&self) -> usize {
        self.results.iter().filter(|e| !e.persisted).count()
    }

    fn summary(&self, record_id: Option<RecordId>, individually_saved: usize) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            status: self.status,
            entries: self.results.len(),
            record_id,
            individually_saved,
            unsaved: self.unsaved(),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub entries: usize,
    /// The aggregate record, when one was stored.
    pub record_id: Option<RecordId>,
    /// Entries stored one by one because no aggregate could be.
    pub individually_saved: usize,
    /// Entries no backend accepted; the session is kept for a retry.
    pub unsaved: usize,
}

/// What a completion event did to the active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStep {
    /// The exercise is not part of the active session.
    NotHandled,
    /// Already recorded; delivered again.
    Duplicate,
    /// Reported ahead of the exercise currently on screen; ignored.
    OutOfOrder { expected: ExerciseId },
    /// Recorded; the next exercise is open.
    Advanced { next_index: usize },
    /// Recorded; the session is over.
    Ended(SessionSummary),
}

/// Collaborators shared by both coordinators.
#[derive(Clone)]
pub struct CoordinatorDeps {
    pub opener: Arc<dyn ExerciseOpener>,
    pub gateway: PersistenceGateway,
    pub notifier: Arc<dyn NotificationSink>,
    pub settings: SuiteSettings,
    pub clock: Clock,
}

//
// ─── COORDINATOR ───────────────────────────────────────────────────────────────
//

/// Drives at most one sequential suite session at a time.
pub struct SingleSuiteCoordinator {
    deps: CoordinatorDeps,
    guard: WindowGuard,
    registry: SessionRegistry,
    active: Option<SingleSuiteSession>,
    pending: Vec<SingleSuiteSession>,
}

impl SingleSuiteCoordinator {
    #[must_use]
    pub fn new(deps: CoordinatorDeps) -> Self {
        let guard = WindowGuard::new(deps.clock.clone());
        Self {
            deps,
            guard,
            registry: SessionRegistry::new(),
            active: None,
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub fn active(&self) -> Option<&SingleSuiteSession> {
        self.active.as_ref()
    }

    /// Ended sessions holding entries that no backend has accepted yet.
    #[must_use]
    pub fn pending(&self) -> &[SingleSuiteSession] {
        &self.pending
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Session owning a completion for `exercise_id`, if any.
    #[must_use]
    pub fn resolve(&self, exercise_id: &ExerciseId, hint: Option<&SessionId>) -> Option<SessionId> {
        let view = self.active.as_ref().map(|session| ActiveSuiteView {
            session_id: &session.id,
            current_exercise: session.current_exercise().map(|e| &e.id),
        });
        self.registry.resolve(exercise_id, hint, view)
    }

    /// Open the first exercise of `sequence` and make the session active.
    ///
    /// # Errors
    ///
    /// - `SuiteError::AlreadyActive` while another session runs; it is left untouched.
    /// - `SuiteError::EmptySequence` for an empty sequence.
    /// - `SuiteError::ContextUnavailable` when no usable child context was obtained. The
    ///   session is aborted and torn down before returning.
    pub async fn start(&mut self, sequence: Vec<ExerciseRef>) -> Result<SessionId, SuiteError> {
        if let Some(active) = &self.active {
            warn!(session_id = %active.id, "suite start rejected; session already active");
            return Err(SuiteError::AlreadyActive(active.id.clone()));
        }
        if sequence.is_empty() {
            return Err(SuiteError::EmptySequence);
        }

        let mut session = SingleSuiteSession::new(sequence, self.deps.clock.now());
        self.registry.register(&session.sequence, &session.id);
        info!(
            session_id = %session.id,
            exercises = session.sequence.len(),
            "starting suite session"
        );

        match self.obtain_context(&session, 0).await {
            Ok(context) => {
                self.adopt_context(&mut session, context);
                session.transition(SessionStatus::Active)?;
                self.deps.notifier.lifecycle(LifecycleEvent::Started {
                    session_id: session.id.clone(),
                });
                let id = session.id.clone();
                self.active = Some(session);
                Ok(id)
            }
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "suite startup failed");
                if let Err(transition) = session.transition(SessionStatus::Aborted) {
                    debug!(error = %transition, "startup abort transition skipped");
                }
                self.deps.notifier.lifecycle(LifecycleEvent::Aborted {
                    session_id: session.id.clone(),
                    reason: err.to_string(),
                });
                self.teardown(&mut session);
                Err(SuiteError::ContextUnavailable(err))
            }
        }
    }

    /// Handle a completion reported by the active session's child context.
    ///
    /// Unknown, duplicate and out-of-order deliveries change nothing.
    ///
    /// # Errors
    ///
    /// Only illegal state transitions surface here; persistence failures degrade to
    /// individual records and show up in the returned summary.
    pub async fn on_completion(
        &mut self,
        exercise_id: &ExerciseId,
        payload: &CompletionPayload,
    ) -> Result<CompletionStep, SuiteError> {
        let Some(session) = self.active.as_ref() else {
            return Ok(CompletionStep::NotHandled);
        };
        let Some(position) = session.position_of(exercise_id) else {
            return Ok(CompletionStep::NotHandled);
        };
        if session.has_result_for(exercise_id) {
            debug!(session_id = %session.id, %exercise_id, "duplicate completion ignored");
            return Ok(CompletionStep::Duplicate);
        }
        if position != session.current_index {
            let expected = session.sequence[session.current_index].id.clone();
            warn!(
                session_id = %session.id,
                %exercise_id,
                %expected,
                "out-of-order completion ignored"
            );
            return Ok(CompletionStep::OutOfOrder { expected });
        }
        let Some(mut session) = self.active.take() else {
            return Ok(CompletionStep::NotHandled);
        };

        let exercise = &session.sequence[position];
        let entry = ResultNormalizer::normalize(
            payload,
            &EntryTarget {
                entry_key: exercise.id.as_str(),
                exercise_id: &exercise.id,
                sub_id: None,
                fallback_title: &exercise.title,
                completed_at: self.deps.clock.now(),
            },
        );
        info!(
            session_id = %session.id,
            %exercise_id,
            correct = entry.score.correct,
            total = entry.score.total,
            "suite exercise completed"
        );
        session.results.push(entry);
        session.current_index += 1;

        if session.current_index >= session.sequence.len() {
            return self.finalize(session).await.map(CompletionStep::Ended);
        }

        let next_index = session.current_index;
        match self.obtain_context(&session, next_index).await {
            Ok(context) => {
                self.adopt_context(&mut session, context);
                self.active = Some(session);
                Ok(CompletionStep::Advanced { next_index })
            }
            Err(err) => {
                error!(session_id = %session.id, error = %err, "no child context for next exercise");
                let summary = self.abort_session(session, &err.to_string(), None).await;
                let message = if summary.unsaved == 0 {
                    "The practice window was lost; completed passages were saved individually."
                } else {
                    "The practice window was lost and your passages could not be saved yet; they are kept for a retry."
                };
                self.deps.notifier.notify(NoticeLevel::Error, message);
                Ok(CompletionStep::Ended(summary))
            }
        }
    }

    /// Abort the active session, saving collected entries individually.
    ///
    /// `skip` names an exercise whose entry must not be saved. Returns `None` when no
    /// session is active.
    pub async fn abort(&mut self, reason: &str, skip: Option<&ExerciseId>) -> Option<SessionSummary> {
        let session = self.active.take()?;
        Some(self.abort_session(session, reason, skip).await)
    }

    /// Try again to store every pending session. Sessions that still have unsaved
    /// entries stay pending.
    pub async fn retry_pending(&mut self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();
        for mut session in std::mem::take(&mut self.pending) {
            let summary = if session.status == SessionStatus::Error {
                match self.persist_aggregate(&mut session).await {
                    Ok(summary) => summary,
                    Err(err) => {
                        warn!(session_id = %session.id, error = %err, "pending suite retry failed");
                        session.summary(None, 0)
                    }
                }
            } else {
                let saved = self.persist_individually(&mut session, None).await;
                session.summary(None, saved)
            };
            info!(
                session_id = %session.id,
                status = %summary.status,
                unsaved = summary.unsaved,
                "pending suite retried"
            );
            summaries.push(summary);
            self.park_if_unsaved(session);
        }
        summaries
    }

    /// Tear down the active session without saving anything.
    pub fn shutdown(&mut self) {
        if let Some(mut session) = self.active.take() {
            if let Err(err) = session.transition(SessionStatus::Aborted) {
                debug!(error = %err, "shutdown transition skipped");
            }
            self.teardown(&mut session);
        }
    }

    async fn finalize(&mut self, mut session: SingleSuiteSession) -> Result<SessionSummary, SuiteError> {
        let outcome = self.persist_aggregate(&mut session).await;
        self.teardown(&mut session);
        self.park_if_unsaved(session);
        outcome
    }

    fn park_if_unsaved(&mut self, session: SingleSuiteSession) {
        let unsaved = session.unsaved();
        if unsaved > 0 {
            warn!(session_id = %session.id, unsaved, "suite entries kept for retry");
            self.pending.push(session);
        }
    }

    async fn persist_aggregate(
        &self,
        session: &mut SingleSuiteSession,
    ) -> Result<SessionSummary, SuiteError> {
        session.transition(SessionStatus::Finalizing)?;
        let existing = self.deps.gateway.list_records().await;
        let record = build_single_suite_record(
            &AggregateInput {
                session_id: &session.id,
                started_at: session.started_at,
                finished_at: self.deps.clock.now(),
                entries: &session.results,
                type_label: self.deps.settings.type_label(),
            },
            &existing,
            session.attempts.len(),
        );

        match self.deps.gateway.save(&record).await {
            Ok(report) => {
                session.transition(SessionStatus::Completed)?;
                for entry in &mut session.results {
                    entry.persisted = true;
                }
                info!(
                    session_id = %session.id,
                    record_id = %report.record_id,
                    percentage = record.score.percentage,
                    "suite session completed"
                );
                self.deps.notifier.lifecycle(LifecycleEvent::Completed {
                    session_id: session.id.clone(),
                    record_id: report.record_id.clone(),
                });
                Ok(session.summary(Some(report.record_id), 0))
            }
            Err(err) => {
                error!(session_id = %session.id, error = %err, "suite aggregate not saved");
                let saved = self.persist_individually(session, None).await;
                session.transition(SessionStatus::Error)?;
                let message = if session.unsaved() == 0 {
                    "Your suite could not be saved as one record; each passage was saved separately."
                } else {
                    "Your suite results could not be saved yet; they are kept for a retry."
                };
                self.deps.notifier.notify(NoticeLevel::Error, message);
                Ok(session.summary(None, saved))
            }
        }
    }

    async fn abort_session(
        &mut self,
        mut session: SingleSuiteSession,
        reason: &str,
        skip: Option<&ExerciseId>,
    ) -> SessionSummary {
        if let Err(err) = session.transition(SessionStatus::Aborted) {
            warn!(session_id = %session.id, error = %err, "abort from unexpected state");
        }
        let saved = self.persist_individually(&mut session, skip).await;
        session
            .results
            .retain(|e| e.persisted || skip != Some(&e.exercise_id));
        warn!(session_id = %session.id, reason, saved, "suite session aborted");
        self.deps.notifier.lifecycle(LifecycleEvent::Aborted {
            session_id: session.id.clone(),
            reason: reason.to_string(),
        });
        self.teardown(&mut session);
        let summary = session.summary(None, saved);
        self.park_if_unsaved(session);
        summary
    }

    /// Store every not-yet-persisted entry as its own record. Returns how many were stored.
    async fn persist_individually(
        &self,
        session: &mut SingleSuiteSession,
        skip: Option<&ExerciseId>,
    ) -> usize {
        let now = self.deps.clock.now();
        let mut saved = 0;
        for entry in &mut session.results {
            if entry.persisted || skip == Some(&entry.exercise_id) {
                continue;
            }
            let record = PracticeRecord::from_entry(
                RecordId::entry_for(&session.id, &entry.entry_key),
                Some(session.id.clone()),
                entry,
                RecordSource::SuiteFallback,
                now,
            );
            match self.deps.gateway.store(&record).await {
                Ok(_) => {
                    entry.persisted = true;
                    saved += 1;
                }
                Err(err) => {
                    error!(
                        session_id = %session.id,
                        exercise_id = %entry.exercise_id,
                        error = %err,
                        "fallback record not saved"
                    );
                }
            }
        }
        saved
    }

    /// Get a ready context showing `sequence[index]`: reuse the open one, else reopen
    /// under the same name.
    async fn obtain_context(
        &self,
        session: &SingleSuiteSession,
        index: usize,
    ) -> Result<Arc<dyn ChildContext>, OpenError> {
        let reuse = session.context.clone().filter(|c| !c.is_closed());
        let reusing = reuse.is_some();
        match self.open_ready(session, index, reuse).await {
            Ok(context) => Ok(context),
            Err(err) if reusing => {
                warn!(session_id = %session.id, error = %err, "reusing child context failed; reopening");
                self.open_ready(session, index, None).await
            }
            Err(err) => Err(err),
        }
    }

    async fn open_ready(
        &self,
        session: &SingleSuiteSession,
        index: usize,
        reuse: Option<Arc<dyn ChildContext>>,
    ) -> Result<Arc<dyn ChildContext>, OpenError> {
        let exercise = session.sequence[index].clone();
        debug!(session_id = %session.id, exercise_id = %exercise.id, index, "opening exercise");
        let context = self
            .deps
            .opener
            .open(OpenRequest {
                exercise,
                target_name: self.deps.settings.child_context_name().to_string(),
                session_id: session.id.clone(),
                sequence_index: index,
                reuse_context: reuse,
            })
            .await?;
        self.wait_until_ready(context.as_ref()).await?;
        Ok(context)
    }

    async fn wait_until_ready(&self, context: &dyn ChildContext) -> Result<(), OpenError> {
        let timeout = self.deps.settings.open_timeout();
        let poll = self.deps.settings.ready_poll_interval();
        tokio::time::timeout(timeout, async {
            loop {
                if context.is_closed() {
                    return Err(OpenError::Closed);
                }
                if context.is_ready() {
                    return Ok(());
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await
        .map_err(|_| OpenError::Timeout(timeout))?
    }

    fn adopt_context(&self, session: &mut SingleSuiteSession, context: Arc<dyn ChildContext>) {
        if let Some(previous) = session.context.take() {
            if !Arc::ptr_eq(&previous, &context) {
                self.guard.release(previous.as_ref());
            }
        }
        if let Err(err) = self
            .guard
            .install(&session.id, &session.attempts, context.as_ref())
        {
            warn!(session_id = %session.id, error = %err, "window guard not installed");
        }
        session.context = Some(context);
    }

    /// Release everything the session holds. Safe to call more than once.
    ///
    /// Returns how many exercise ids were unregistered by this call.
    pub fn teardown(&mut self, session: &mut SingleSuiteSession) -> usize {
        if let Some(context) = session.context.take() {
            if let Err(err) = context.post_message(ChildMessage::ForceClose {
                session_id: session.id.clone(),
            }) {
                debug!(session_id = %session.id, error = %err, "force-close message not delivered");
            }
            self.guard.release(context.as_ref());
            if !context.is_coordinator_context() {
                if let Err(err) = context.close() {
                    debug!(session_id = %session.id, error = %err, "child context close failed");
                }
            }
        }
        if !session.hooks_run {
            for exercise in &session.sequence {
                self.deps.opener.cleanup(&exercise.id);
            }
            session.hooks_run = true;
        }
        let removed = self.registry.unregister(&session.sequence, &session.id);
        debug!(session_id = %session.id, removed, "suite session torn down");
        removed
    }
}
