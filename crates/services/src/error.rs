//! Shared error types for the services crate.

use std::time::Duration;

use thiserror::Error;

use storage::repository::StorageError;
use suite_core::model::{ExerciseCategory, SessionId, TransitionError};

/// One backend's refusal to store a record.
#[derive(Debug, Error)]
#[error("{backend}: {source}")]
pub struct BackendFailure {
    pub backend: &'static str,
    #[source]
    pub source: StorageError,
}

/// Errors emitted by `PersistenceGateway`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistenceError {
    #[error("no persistence backend configured")]
    NoBackends,
    #[error("every persistence backend failed ({})", .0.len())]
    AllBackendsFailed(Vec<BackendFailure>),
}

/// Errors raised by a child execution context when the coordinator touches it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContextError {
    #[error("child context is cross-origin restricted")]
    CrossOrigin,
    #[error("child context is closed")]
    Closed,
    #[error("child context error: {0}")]
    Other(String),
}

/// Errors emitted by an `ExerciseOpener`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum OpenError {
    #[error("opener failed: {0}")]
    Failed(String),
    #[error("child context closed before it became ready")]
    Closed,
    #[error("child context not ready after {0:?}")]
    Timeout(Duration),
}

/// Errors emitted by an `ExamIndexProvider`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExamIndexError {
    #[error("exam index unavailable: {0}")]
    Unavailable(String),
}

/// Errors emitted by the suite coordinators and orchestrator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SuiteError {
    #[error("suite session {0} is already active")]
    AlreadyActive(SessionId),
    #[error("suite sequence is empty")]
    EmptySequence,
    #[error("no reading exercise available for {0}")]
    MissingCategory(ExerciseCategory),
    #[error("could not obtain a child context: {0}")]
    ContextUnavailable(#[from] OpenError),
    #[error("completion payload has no suite id")]
    MissingSubId,
    #[error("no multi-suite session for {0}")]
    UnknownMultiSession(String),
    #[error("multi-suite session {0} has no results to finalize")]
    NothingToFinalize(String),
    #[error(transparent)]
    ExamIndex(#[from] ExamIndexError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl SuiteError {
    /// Message shown to the learner for this failure.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::AlreadyActive(_) => "A suite practice session is already running.".into(),
            Self::EmptySequence | Self::MissingCategory(_) => {
                "Not enough reading passages to build a suite.".into()
            }
            Self::ContextUnavailable(_) => {
                "The practice window could not be opened. Please allow pop-ups and retry.".into()
            }
            Self::Persistence(_) => "Your results could not be saved.".into(),
            other => format!("Suite practice failed: {other}"),
        }
    }
}
