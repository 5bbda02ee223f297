use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Lifecycle of a coordinated session.
///
/// `Initializing → Active → Finalizing → {Completed | Error}`, with `Aborted` (and
/// `Error` for startup failures) reachable before finalization. Terminal states
/// have no outgoing transitions except `Error → Finalizing`, used to retry a
/// multi-suite persistence failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Active,
    Finalizing,
    Completed,
    Error,
    Aborted,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("illegal session transition {from} -> {to}")]
pub struct TransitionError {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

impl SessionStatus {
    /// Validates and performs a transition.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` when `to` is not reachable from `self`.
    pub fn transition(self, to: SessionStatus) -> Result<SessionStatus, TransitionError> {
        use SessionStatus::{Aborted, Active, Completed, Error, Finalizing, Initializing};
        let legal = matches!(
            (self, to),
            (Initializing, Active | Aborted | Error)
                | (Active, Finalizing | Aborted | Error)
                | (Finalizing, Completed | Error)
                | (Error, Finalizing)
        );
        if legal {
            Ok(to)
        } else {
            Err(TransitionError { from: self, to })
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Aborted)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── CLOSE ATTEMPTS ────────────────────────────────────────────────────────────
//

/// Why a guarded child context tried to escape the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    ScriptRequest,
    SelfTargetOpen,
}

/// Diagnostic record of one intercepted escape attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseAttempt {
    pub reason: CloseReason,
    pub timestamp: DateTime<Utc>,
}
