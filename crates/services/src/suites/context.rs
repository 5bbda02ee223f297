//! Contracts of the collaborators the orchestrator drives but does not own.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use suite_core::model::{ExerciseId, ExerciseRef, RecordId, SessionId};

use crate::error::{ContextError, ExamIndexError, OpenError};

//
// ─── CHILD CONTEXT ─────────────────────────────────────────────────────────────
//

/// Result of a child script asking to close its own context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    Suppressed,
}

/// Result of a child script asking to open a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A separate window was opened under the given name.
    Opened(String),
    /// The request targeted the context itself; it stays where it is.
    Existing,
    /// Nothing was opened.
    Blocked,
}

/// The close/open capabilities a child context's own script calls on itself.
///
/// A guard swaps these for interceptors; the coordinator closes the context through
/// `ChildContext::close`, which never goes through this slot.
pub trait WindowCapabilities: Send + Sync {
    fn close(&self) -> CloseOutcome;
    fn open(&self, url: &str, target: &str) -> OpenOutcome;
}

/// Bookkeeping for an installed guard, attached to the context itself.
#[derive(Clone)]
pub struct WindowGuardRecord {
    pub session_id: SessionId,
    /// Capabilities in place before the guard, `None` when the context had no override.
    pub native: Option<Arc<dyn WindowCapabilities>>,
    pub installed_at: DateTime<Utc>,
}

impl std::fmt::Debug for WindowGuardRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowGuardRecord")
            .field("session_id", &self.session_id)
            .field("has_native", &self.native.is_some())
            .field("installed_at", &self.installed_at)
            .finish()
    }
}

/// Cooperative messages posted into a child context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildMessage {
    /// Ask the child to shut itself down; the session is over.
    ForceClose { session_id: SessionId },
}

/// An independently loaded window/tab running exercise content.
///
/// Every accessor may fail once the context navigated off-origin or closed.
pub trait ChildContext: Send + Sync {
    fn name(&self) -> &str;
    fn is_closed(&self) -> bool;
    fn is_ready(&self) -> bool;

    /// True when this handle is the coordinator's own top-level context, which must
    /// never be closed by teardown.
    fn is_coordinator_context(&self) -> bool {
        false
    }

    /// Close the context on the coordinator's behalf.
    ///
    /// # Errors
    ///
    /// Returns `ContextError` when the context refuses or is already gone.
    fn close(&self) -> Result<(), ContextError>;

    /// Post a fire-and-forget message into the context.
    ///
    /// # Errors
    ///
    /// Returns `ContextError` when the context cannot receive messages.
    fn post_message(&self, message: ChildMessage) -> Result<(), ContextError>;

    /// Current close/open capabilities, `None` when no override is installed.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::CrossOrigin` when the context cannot be inspected.
    fn capabilities(&self) -> Result<Option<Arc<dyn WindowCapabilities>>, ContextError>;

    /// Replace the capabilities; `None` removes the override.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::CrossOrigin` when the context cannot be modified.
    fn replace_capabilities(
        &self,
        capabilities: Option<Arc<dyn WindowCapabilities>>,
    ) -> Result<(), ContextError>;

    /// # Errors
    ///
    /// Returns `ContextError::CrossOrigin` when the context cannot be inspected.
    fn guard_record(&self) -> Result<Option<WindowGuardRecord>, ContextError>;

    /// # Errors
    ///
    /// Returns `ContextError::CrossOrigin` when the context cannot be modified.
    fn set_guard_record(&self, record: Option<WindowGuardRecord>) -> Result<(), ContextError>;
}

//
// ─── OPENER / INDEX ────────────────────────────────────────────────────────────
//

/// Request to load an exercise into a named child context.
#[derive(Clone)]
pub struct OpenRequest {
    pub exercise: ExerciseRef,
    pub target_name: String,
    pub session_id: SessionId,
    pub sequence_index: usize,
    /// Context to navigate instead of opening a new one.
    pub reuse_context: Option<Arc<dyn ChildContext>>,
}

impl std::fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRequest")
            .field("exercise", &self.exercise.id)
            .field("target_name", &self.target_name)
            .field("session_id", &self.session_id)
            .field("sequence_index", &self.sequence_index)
            .field("reuse", &self.reuse_context.is_some())
            .finish()
    }
}

#[async_trait]
pub trait ExerciseOpener: Send + Sync {
    /// Open (or navigate) a child context to the requested exercise.
    ///
    /// # Errors
    ///
    /// Returns `OpenError` when no context can be obtained.
    async fn open(&self, request: OpenRequest) -> Result<Arc<dyn ChildContext>, OpenError>;

    /// Per-exercise cleanup hook run during teardown.
    fn cleanup(&self, _exercise_id: &ExerciseId) {}
}

#[async_trait]
pub trait ExamIndexProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns `ExamIndexError` when the catalog cannot be read.
    async fn get_index(&self) -> Result<Vec<ExerciseRef>, ExamIndexError>;
}

#[async_trait]
impl ExamIndexProvider for Vec<ExerciseRef> {
    async fn get_index(&self) -> Result<Vec<ExerciseRef>, ExamIndexError> {
        Ok(self.clone())
    }
}

//
// ─── NOTIFICATIONS ─────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Lifecycle notices emitted for UI feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Started { session_id: SessionId },
    Completed { session_id: SessionId, record_id: RecordId },
    Aborted { session_id: SessionId, reason: String },
}

/// Fire-and-forget user-facing messages. Never awaited.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);

    fn lifecycle(&self, _event: LifecycleEvent) {}
}

/// Sink that forwards everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info => tracing::info!(target: "suite::notice", "{message}"),
            NoticeLevel::Warning => tracing::warn!(target: "suite::notice", "{message}"),
            NoticeLevel::Error => tracing::error!(target: "suite::notice", "{message}"),
        }
    }

    fn lifecycle(&self, event: LifecycleEvent) {
        tracing::info!(target: "suite::lifecycle", ?event, "session lifecycle");
    }
}
