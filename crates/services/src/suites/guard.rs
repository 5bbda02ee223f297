//! Capability interception for child contexts.
//!
//! Untrusted exercise content may call `close()` or `open(.., "_self")` as part of its
//! own UX. While a guard is installed those calls are recorded and neutralized so the
//! coordinator keeps its handle; opens aimed at other windows still go through.

use std::sync::{Arc, Mutex, PoisonError};

use suite_core::Clock;
use suite_core::model::{CloseAttempt, CloseReason, SessionId};
use tracing::debug;

use super::context::{
    ChildContext, CloseOutcome, OpenOutcome, WindowCapabilities, WindowGuardRecord,
};
use crate::error::ContextError;

/// Shared, append-only list of intercepted escape attempts for one session.
#[derive(Debug, Clone, Default)]
pub struct AttemptLog(Arc<Mutex<Vec<CloseAttempt>>>);

impl AttemptLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, attempt: CloseAttempt) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(attempt);
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<CloseAttempt> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardInstall {
    Installed,
    AlreadyInstalled,
}

/// Installs and releases guards on child contexts.
#[derive(Debug, Clone, Default)]
pub struct WindowGuard {
    clock: Clock,
}

impl WindowGuard {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self { clock }
    }

    /// Guard `context` for `session_id`. A no-op when that session's guard is already in place.
    ///
    /// # Errors
    ///
    /// Returns `ContextError` when the context cannot be inspected or modified.
    pub fn install(
        &self,
        session_id: &SessionId,
        attempts: &AttemptLog,
        context: &dyn ChildContext,
    ) -> Result<GuardInstall, ContextError> {
        let existing = context.guard_record()?;
        if existing
            .as_ref()
            .is_some_and(|record| &record.session_id == session_id)
        {
            return Ok(GuardInstall::AlreadyInstalled);
        }

        // A guard left by another session already holds the real capabilities.
        let native = match existing {
            Some(record) => record.native,
            None => context.capabilities()?,
        };

        let guarded: Arc<dyn WindowCapabilities> = Arc::new(GuardedCapabilities {
            context_name: context.name().to_string(),
            native: native.clone(),
            attempts: attempts.clone(),
            clock: self.clock.clone(),
        });
        context.replace_capabilities(Some(guarded))?;
        context.set_guard_record(Some(WindowGuardRecord {
            session_id: session_id.clone(),
            native,
            installed_at: self.clock.now(),
        }))?;
        debug!(%session_id, context = context.name(), "window guard installed");
        Ok(GuardInstall::Installed)
    }

    /// Restore the captured capabilities and drop the guard record.
    ///
    /// Failures (cross-origin, already closed) are logged at debug level and swallowed.
    pub fn release(&self, context: &dyn ChildContext) {
        let record = match context.guard_record() {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => {
                debug!(context = context.name(), error = %err, "guard release skipped");
                return;
            }
        };
        if let Err(err) = context.replace_capabilities(record.native) {
            debug!(context = context.name(), error = %err, "could not restore native capabilities");
        }
        if let Err(err) = context.set_guard_record(None) {
            debug!(context = context.name(), error = %err, "could not clear guard record");
        }
    }

    /// Append an attempt to the session's diagnostics.
    pub fn record_attempt(&self, attempts: &AttemptLog, reason: CloseReason) {
        record_attempt(attempts, reason, &self.clock);
    }
}

fn record_attempt(attempts: &AttemptLog, reason: CloseReason, clock: &Clock) {
    attempts.push(CloseAttempt {
        reason,
        timestamp: clock.now(),
    });
}

/// Whether an `open` target names the context itself.
#[must_use]
pub fn targets_self(target: &str, context_name: &str) -> bool {
    let target = target.trim();
    target.is_empty()
        || target.eq_ignore_ascii_case("_self")
        || target.eq_ignore_ascii_case("_top")
        || target == context_name
}

struct GuardedCapabilities {
    context_name: String,
    native: Option<Arc<dyn WindowCapabilities>>,
    attempts: AttemptLog,
    clock: Clock,
}

impl WindowCapabilities for GuardedCapabilities {
    fn close(&self) -> CloseOutcome {
        record_attempt(&self.attempts, CloseReason::ScriptRequest, &self.clock);
        debug!(context = %self.context_name, "suppressed script close");
        CloseOutcome::Suppressed
    }

    fn open(&self, url: &str, target: &str) -> OpenOutcome {
        if targets_self(target, &self.context_name) {
            record_attempt(&self.attempts, CloseReason::SelfTargetOpen, &self.clock);
            debug!(context = %self.context_name, url, "kept self-targeted open in place");
            return OpenOutcome::Existing;
        }
        match &self.native {
            Some(native) => native.open(url, target),
            None => OpenOutcome::Blocked,
        }
    }
}
