use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::model::ids::{ExerciseId, RecordId, SessionId};
use crate::model::result::{AnswerComparison, ResultEntry, ScoreInfo, SpellingError};

/// Where a persisted record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    /// Aggregate of a sequential suite session.
    SuiteMode,
    /// Aggregate of a scatter/gather multi-suite session.
    MultiSuite,
    /// One entry of a suite session written on its own after a failure.
    SuiteFallback,
    /// An ordinary single-exercise completion outside any suite.
    Standalone,
}

impl RecordSource {
    #[must_use]
    pub fn is_aggregate(self) -> bool {
        matches!(self, Self::SuiteMode | Self::MultiSuite)
    }
}

/// The durable unit written to storage and read back by history views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeRecord {
    pub id: RecordId,
    pub exercise_id: ExerciseId,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub title: String,
    pub source: RecordSource,
    pub score: ScoreInfo,
    #[serde(default)]
    pub answers: BTreeMap<String, Value>,
    #[serde(default)]
    pub comparison: BTreeMap<String, AnswerComparison>,
    #[serde(default)]
    pub spelling_errors: Vec<SpellingError>,
    pub duration_secs: u64,
    pub started_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub suite_entries: Vec<ResultEntry>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl PracticeRecord {
    /// Builds a non-aggregated record from a single result entry.
    #[must_use]
    pub fn from_entry(
        id: RecordId,
        session_id: Option<SessionId>,
        entry: &ResultEntry,
        source: RecordSource,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        let started_at = entry
            .completed_at
            .checked_sub_signed(chrono::Duration::seconds(
                i64::try_from(entry.duration_secs).unwrap_or(0),
            ))
            .unwrap_or(entry.completed_at);
        Self {
            id,
            exercise_id: entry.exercise_id.clone(),
            session_id,
            title: entry.title.clone(),
            source,
            score: entry.score,
            answers: entry.answers.clone(),
            comparison: entry.comparison.clone(),
            spelling_errors: entry.spelling_errors.clone(),
            duration_secs: entry.duration_secs,
            started_at,
            recorded_at,
            suite_entries: Vec::new(),
            metadata: entry.metadata.clone(),
        }
    }

    /// True for records that fold several entries together. Cleanup never deletes these.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        self.source.is_aggregate() || !self.suite_entries.is_empty()
    }

    #[must_use]
    pub fn total_questions(&self) -> u32 {
        self.score.total
    }

    #[must_use]
    pub fn correct_answers(&self) -> u32 {
        self.score.correct
    }

    #[must_use]
    pub fn percentage(&self) -> u32 {
        self.score.percentage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn entry() -> ResultEntry {
        ResultEntry {
            entry_key: "p1".into(),
            exercise_id: ExerciseId::new("p1"),
            sub_id: None,
            title: "Bees".into(),
            score: ScoreInfo::from_counts(3, 4),
            answers: BTreeMap::new(),
            comparison: BTreeMap::new(),
            spelling_errors: Vec::new(),
            duration_secs: 120,
            completed_at: fixed_now(),
            metadata: Map::new(),
            persisted: false,
        }
    }

    #[test]
    fn entry_record_is_not_aggregate() {
        let record = PracticeRecord::from_entry(
            RecordId::new("r1"),
            Some(SessionId::new("s1")),
            &entry(),
            RecordSource::SuiteFallback,
            fixed_now(),
        );
        assert!(!record.is_aggregate());
        assert_eq!(record.started_at, fixed_now() - chrono::Duration::seconds(120));
        assert_eq!(record.total_questions(), 4);
    }

    #[test]
    fn records_with_entries_count_as_aggregate() {
        let mut record = PracticeRecord::from_entry(
            RecordId::new("r1"),
            None,
            &entry(),
            RecordSource::Standalone,
            fixed_now(),
        );
        record.suite_entries.push(entry());
        assert!(record.is_aggregate());
    }
}
