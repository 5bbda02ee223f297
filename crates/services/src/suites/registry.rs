use std::collections::HashMap;

use suite_core::model::{ExerciseId, ExerciseRef, SessionId};

/// The active single-suite session as the registry needs to see it.
#[derive(Debug, Clone, Copy)]
pub struct ActiveSuiteView<'a> {
    pub session_id: &'a SessionId,
    pub current_exercise: Option<&'a ExerciseId>,
}

/// Lookup from exercise id to the session that owns it. Holds no session lifecycle.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    owners: HashMap<ExerciseId, SessionId>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every exercise of `sequence` as owned by `session_id`.
    pub fn register(&mut self, sequence: &[ExerciseRef], session_id: &SessionId) {
        for exercise in sequence {
            self.owners.insert(exercise.id.clone(), session_id.clone());
        }
    }

    /// Owner of a completion event: the event's own hint, then the registry, then the
    /// active suite session when its current exercise matches.
    #[must_use]
    pub fn resolve(
        &self,
        exercise_id: &ExerciseId,
        hint: Option<&SessionId>,
        active: Option<ActiveSuiteView<'_>>,
    ) -> Option<SessionId> {
        if let Some(hint) = hint {
            return Some(hint.clone());
        }
        if let Some(owner) = self.owners.get(exercise_id) {
            return Some(owner.clone());
        }
        active
            .filter(|view| view.current_exercise == Some(exercise_id))
            .map(|view| view.session_id.clone())
    }

    /// Remove the ids of `sequence` still owned by `session_id`; returns how many went.
    pub fn unregister(&mut self, sequence: &[ExerciseRef], session_id: &SessionId) -> usize {
        let mut removed = 0;
        for exercise in sequence {
            if self.owners.get(&exercise.id) == Some(session_id) {
                self.owners.remove(&exercise.id);
                removed += 1;
            }
        }
        removed
    }

    #[must_use]
    pub fn owner_of(&self, exercise_id: &ExerciseId) -> Option<&SessionId> {
        self.owners.get(exercise_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
