use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of one coordinated suite session.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an existing session id (e.g. a hint carried on a completion event).
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh id for a single-suite session.
    #[must_use]
    pub fn generate_suite() -> Self {
        Self(format!("suite_{}", Uuid::new_v4().simple()))
    }

    /// Generates a fresh id for a multi-suite session.
    #[must_use]
    pub fn generate_multi() -> Self {
        Self(format!("multi_{}", Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier of one exercise from the exam index.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExerciseId(String);

impl ExerciseId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier of a persisted practice record.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id of the aggregate record a session produces. Stable per session so a
    /// re-attempted save overwrites instead of duplicating.
    #[must_use]
    pub fn aggregate_for(session_id: &SessionId) -> Self {
        Self(format!("{}::aggregate", session_id.0))
    }

    /// Id of an individually persisted entry of a session.
    #[must_use]
    pub fn entry_for(session_id: &SessionId, entry_key: &str) -> Self {
        Self(format!("{}::{entry_key}", session_id.0))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Debug for ExerciseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExerciseId({})", self.0)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

// ─── Display Implementations ───────────────────────────────────────────────────

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ExerciseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExerciseId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ExerciseId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_session_ids_are_unique_and_prefixed() {
        let a = SessionId::generate_suite();
        let b = SessionId::generate_suite();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("suite_"));
        assert!(SessionId::generate_multi().as_str().starts_with("multi_"));
    }

    #[test]
    fn record_ids_derive_from_session() {
        let session = SessionId::new("suite_1");
        assert_eq!(RecordId::aggregate_for(&session).as_str(), "suite_1::aggregate");
        assert_eq!(RecordId::entry_for(&session, "p1").as_str(), "suite_1::p1");
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ExerciseId::new("p1-001");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"p1-001\"");
    }
}
