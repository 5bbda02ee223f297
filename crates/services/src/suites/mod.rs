pub mod aggregate;
pub mod context;
pub mod guard;
pub mod multi;
pub mod normalize;
pub mod orchestrator;
pub mod persistence;
pub mod plan;
pub mod registry;
pub mod sim;
pub mod single;

pub use context::{
    ChildContext, ChildMessage, CloseOutcome, ExamIndexProvider, ExerciseOpener, LifecycleEvent,
    LogNotificationSink, NoticeLevel, NotificationSink, OpenOutcome, OpenRequest,
    WindowCapabilities, WindowGuardRecord,
};
pub use guard::{AttemptLog, GuardInstall, WindowGuard};
pub use multi::{MultiSuiteCoordinator, MultiSuiteSession, SubCompletionStep, derive_base_id};
pub use normalize::{CompletionPayload, EntryTarget, ResultNormalizer};
pub use orchestrator::{CompletionOutcome, SuiteDeps, SuiteOrchestrator};
pub use persistence::{PersistenceGateway, SaveReport};
pub use plan::SuitePlanner;
pub use registry::{ActiveSuiteView, SessionRegistry};
pub use single::{
    CompletionStep, CoordinatorDeps, SessionSummary, SingleSuiteCoordinator, SingleSuiteSession,
};
