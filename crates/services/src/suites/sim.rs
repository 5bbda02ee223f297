//! In-process stand-ins for browser contexts, used by the demo runner and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::{Value, json};
use suite_core::model::ExerciseId;

use super::context::{
    ChildContext, ChildMessage, CloseOutcome, ExerciseOpener, LifecycleEvent, NoticeLevel,
    NotificationSink, OpenOutcome, OpenRequest, WindowCapabilities, WindowGuardRecord,
};
use crate::error::{ContextError, OpenError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//
// ─── CONTEXT ───────────────────────────────────────────────────────────────────
//

/// A simulated tab. Its script-side `close`/`open` go through the capability slot.
pub struct SimContext {
    name: String,
    closed: AtomicBool,
    ready: AtomicBool,
    cross_origin: AtomicBool,
    coordinator_context: bool,
    capabilities: Mutex<Option<Arc<dyn WindowCapabilities>>>,
    guard: Mutex<Option<WindowGuardRecord>>,
    messages: Mutex<Vec<ChildMessage>>,
    current_exercise: Mutex<Option<ExerciseId>>,
    navigations: AtomicUsize,
}

struct NativeCapabilities {
    context: Weak<SimContext>,
}

impl WindowCapabilities for NativeCapabilities {
    fn close(&self) -> CloseOutcome {
        if let Some(context) = self.context.upgrade() {
            context.closed.store(true, Ordering::SeqCst);
        }
        CloseOutcome::Closed
    }

    fn open(&self, _url: &str, target: &str) -> OpenOutcome {
        OpenOutcome::Opened(target.to_string())
    }
}

impl SimContext {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), false)
    }

    /// The coordinator's own top-level context; teardown must leave it open.
    #[must_use]
    pub fn coordinator(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), true)
    }

    fn build(name: String, coordinator_context: bool) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<SimContext>| {
            let native: Arc<dyn WindowCapabilities> = Arc::new(NativeCapabilities {
                context: weak.clone(),
            });
            Self {
                name,
                closed: AtomicBool::new(false),
                ready: AtomicBool::new(true),
                cross_origin: AtomicBool::new(false),
                coordinator_context,
                capabilities: Mutex::new(Some(native)),
                guard: Mutex::new(None),
                messages: Mutex::new(Vec::new()),
                current_exercise: Mutex::new(None),
                navigations: AtomicUsize::new(0),
            }
        })
    }

    /// The exercise script calling `window.close()`.
    pub fn script_close(&self) -> CloseOutcome {
        let capabilities = lock(&self.capabilities).clone();
        match capabilities {
            Some(capabilities) => capabilities.close(),
            None => {
                self.closed.store(true, Ordering::SeqCst);
                CloseOutcome::Closed
            }
        }
    }

    /// The exercise script calling `window.open(url, target)`.
    pub fn script_open(&self, url: &str, target: &str) -> OpenOutcome {
        let capabilities = lock(&self.capabilities).clone();
        match capabilities {
            Some(capabilities) => capabilities.open(url, target),
            None => OpenOutcome::Opened(target.to_string()),
        }
    }

    /// The user closing the tab from the browser chrome.
    pub fn user_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_cross_origin(&self, cross_origin: bool) {
        self.cross_origin.store(cross_origin, Ordering::SeqCst);
    }

    fn navigate(&self, exercise_id: &ExerciseId) {
        *lock(&self.current_exercise) = Some(exercise_id.clone());
        self.navigations.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn current_exercise(&self) -> Option<ExerciseId> {
        lock(&self.current_exercise).clone()
    }

    #[must_use]
    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn messages(&self) -> Vec<ChildMessage> {
        lock(&self.messages).clone()
    }

    fn accessible(&self) -> Result<(), ContextError> {
        if self.cross_origin.load(Ordering::SeqCst) {
            return Err(ContextError::CrossOrigin);
        }
        if self.is_closed() {
            return Err(ContextError::Closed);
        }
        Ok(())
    }
}

impl ChildContext for SimContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn is_coordinator_context(&self) -> bool {
        self.coordinator_context
    }

    fn close(&self) -> Result<(), ContextError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn post_message(&self, message: ChildMessage) -> Result<(), ContextError> {
        if self.is_closed() {
            return Err(ContextError::Closed);
        }
        lock(&self.messages).push(message);
        Ok(())
    }

    fn capabilities(&self) -> Result<Option<Arc<dyn WindowCapabilities>>, ContextError> {
        self.accessible()?;
        Ok(lock(&self.capabilities).clone())
    }

    fn replace_capabilities(
        &self,
        capabilities: Option<Arc<dyn WindowCapabilities>>,
    ) -> Result<(), ContextError> {
        self.accessible()?;
        *lock(&self.capabilities) = capabilities;
        Ok(())
    }

    fn guard_record(&self) -> Result<Option<WindowGuardRecord>, ContextError> {
        self.accessible()?;
        Ok(lock(&self.guard).clone())
    }

    fn set_guard_record(&self, record: Option<WindowGuardRecord>) -> Result<(), ContextError> {
        self.accessible()?;
        *lock(&self.guard) = record;
        Ok(())
    }
}

//
// ─── BROWSER ───────────────────────────────────────────────────────────────────
//

/// One call the coordinator made to the opener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenLog {
    pub exercise_id: ExerciseId,
    pub target_name: String,
    pub sequence_index: usize,
    pub reused: bool,
}

#[derive(Debug, Default)]
struct Behaviour {
    fail_next: usize,
    fail_always: bool,
    hand_out_closed: bool,
    not_ready: bool,
    coordinator_context: bool,
}

/// Opener that keeps named tabs the way a browser does: opening a name that is
/// still open navigates that tab instead of creating a new one.
#[derive(Default)]
pub struct SimBrowser {
    contexts: Mutex<HashMap<String, Arc<SimContext>>>,
    behaviour: Mutex<Behaviour>,
    opens: Mutex<Vec<OpenLog>>,
    cleanups: Mutex<Vec<ExerciseId>>,
}

impl SimBrowser {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` open calls.
    pub fn fail_next_opens(&self, count: usize) {
        lock(&self.behaviour).fail_next = count;
    }

    pub fn fail_all_opens(&self, fail: bool) {
        lock(&self.behaviour).fail_always = fail;
    }

    /// Hand out contexts that are already closed (popup blocked).
    pub fn hand_out_closed(&self, closed: bool) {
        lock(&self.behaviour).hand_out_closed = closed;
    }

    /// Open exercises in the coordinator's own context instead of a separate tab.
    pub fn open_in_coordinator(&self, coordinator: bool) {
        lock(&self.behaviour).coordinator_context = coordinator;
    }

    /// New contexts never report ready.
    pub fn never_ready(&self, never: bool) {
        lock(&self.behaviour).not_ready = never;
    }

    #[must_use]
    pub fn context(&self, name: &str) -> Option<Arc<SimContext>> {
        lock(&self.contexts).get(name).cloned()
    }

    #[must_use]
    pub fn opens(&self) -> Vec<OpenLog> {
        lock(&self.opens).clone()
    }

    #[must_use]
    pub fn cleanups(&self) -> Vec<ExerciseId> {
        lock(&self.cleanups).clone()
    }

    fn should_fail(&self) -> bool {
        let mut behaviour = lock(&self.behaviour);
        if behaviour.fail_always {
            return true;
        }
        if behaviour.fail_next > 0 {
            behaviour.fail_next -= 1;
            return true;
        }
        false
    }
}

#[async_trait]
impl ExerciseOpener for SimBrowser {
    async fn open(&self, request: OpenRequest) -> Result<Arc<dyn ChildContext>, OpenError> {
        let reused = request.reuse_context.is_some();
        lock(&self.opens).push(OpenLog {
            exercise_id: request.exercise.id.clone(),
            target_name: request.target_name.clone(),
            sequence_index: request.sequence_index,
            reused,
        });
        if self.should_fail() {
            return Err(OpenError::Failed(format!(
                "popup blocked for {}",
                request.exercise.id
            )));
        }

        let (hand_out_closed, not_ready, coordinator_context) = {
            let behaviour = lock(&self.behaviour);
            (
                behaviour.hand_out_closed,
                behaviour.not_ready,
                behaviour.coordinator_context,
            )
        };
        let context = {
            let mut contexts = lock(&self.contexts);
            match contexts.get(&request.target_name) {
                Some(existing) if !existing.is_closed() => Arc::clone(existing),
                _ => {
                    let fresh = if coordinator_context {
                        SimContext::coordinator(request.target_name.clone())
                    } else {
                        SimContext::new(request.target_name.clone())
                    };
                    fresh.set_ready(!not_ready);
                    contexts.insert(request.target_name.clone(), Arc::clone(&fresh));
                    fresh
                }
            }
        };
        context.navigate(&request.exercise.id);
        if hand_out_closed {
            context.user_close();
        }
        Ok(context)
    }

    fn cleanup(&self, exercise_id: &ExerciseId) {
        lock(&self.cleanups).push(exercise_id.clone());
    }
}

//
// ─── NOTIFICATIONS ─────────────────────────────────────────────────────────────
//

/// Sink that keeps everything it is told, for assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    notices: Mutex<Vec<(NoticeLevel, String)>>,
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn notices(&self) -> Vec<(NoticeLevel, String)> {
        lock(&self.notices).clone()
    }

    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        lock(&self.events).clone()
    }

    #[must_use]
    pub fn count(&self, level: NoticeLevel) -> usize {
        lock(&self.notices).iter().filter(|(l, _)| *l == level).count()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, level: NoticeLevel, message: &str) {
        lock(&self.notices).push((level, message.to_string()));
    }

    fn lifecycle(&self, event: LifecycleEvent) {
        lock(&self.events).push(event);
    }
}

/// Completion payload as a reading exercise page posts it.
#[must_use]
pub fn completion_payload(correct: u32, total: u32, duration_secs: u64) -> Value {
    json!({
        "scoreInfo": { "correct": correct, "total": total },
        "duration": duration_secs,
    })
}

/// Completion payload of one sub-suite of a multi-suite exercise.
#[must_use]
pub fn sub_suite_payload(suite_id: u32, total_suites: Option<u32>, correct: u32, total: u32) -> Value {
    let mut payload = completion_payload(correct, total, 60);
    payload["suiteId"] = json!(suite_id);
    if let Some(count) = total_suites {
        payload["totalSuites"] = json!(count);
    }
    payload
}
