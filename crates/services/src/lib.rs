#![forbid(unsafe_code)]

pub mod error;
pub mod suites;

pub use suite_core::Clock;

pub use error::{
    BackendFailure, ContextError, ExamIndexError, OpenError, PersistenceError, SuiteError,
};
pub use suites::{
    CompletionOutcome, CompletionStep, SessionSummary, SubCompletionStep, SuiteDeps,
    SuiteOrchestrator,
};
