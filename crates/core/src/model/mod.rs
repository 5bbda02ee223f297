mod exercise;
mod ids;
mod record;
mod result;
mod session;
mod settings;

pub use exercise::{ExerciseCategory, ExerciseRef};
pub use ids::{ExerciseId, RecordId, SessionId};
pub use record::{PracticeRecord, RecordSource};
pub use result::{percentage_of, AnswerComparison, ResultEntry, ScoreInfo, SpellingError};
pub use session::{CloseAttempt, CloseReason, SessionStatus, TransitionError};
pub use settings::{SettingsError, SuiteCountHint, SuiteSettings, SuiteSettingsDraft};
