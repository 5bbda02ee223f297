use thiserror::Error;

use crate::model::{SettingsError, TransitionError};

/// Umbrella error for the domain model.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SessionStatus, SuiteSettingsDraft};

    #[test]
    fn wraps_model_errors() {
        let transition = SessionStatus::Completed
            .transition(SessionStatus::Active)
            .unwrap_err();
        let err: Error = transition.into();
        assert_eq!(err.to_string(), "illegal session transition completed -> active");

        let settings = SuiteSettingsDraft {
            fallback_record_cap: Some(0),
            ..SuiteSettingsDraft::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(Error::from(settings), Error::Settings(SettingsError::InvalidRecordCap)));
    }
}
