use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::model::ids::ExerciseId;

//
// ─── SCORE ─────────────────────────────────────────────────────────────────────
//

/// Raw score counters reported for one exercise or folded across many.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreInfo {
    pub correct: u32,
    pub total: u32,
    pub accuracy: f64,
    pub percentage: u32,
}

impl ScoreInfo {
    /// Builds counters from `correct`/`total`, deriving accuracy (0 when `total == 0`)
    /// and the rounded percentage.
    #[must_use]
    pub fn from_counts(correct: u32, total: u32) -> Self {
        let accuracy = if total == 0 {
            0.0
        } else {
            f64::from(correct) / f64::from(total)
        };
        Self {
            correct,
            total,
            accuracy,
            percentage: percentage_of(accuracy),
        }
    }
}

/// `round(accuracy * 100)`, clamped into `0..=100`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn percentage_of(accuracy: f64) -> u32 {
    if !accuracy.is_finite() || accuracy <= 0.0 {
        return 0;
    }
    (accuracy * 100.0).round().min(100.0) as u32
}

//
// ─── ANSWERS ───────────────────────────────────────────────────────────────────
//

/// Per-question comparison of the learner's answer against the key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnswerComparison {
    pub user_answer: Option<String>,
    pub correct_answer: Option<String>,
    pub is_correct: bool,
}

/// A misspelled word the learner typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellingError {
    pub word: String,
    pub user_input: String,
    #[serde(default)]
    pub question_id: Option<String>,
    #[serde(default)]
    pub exercise_id: Option<ExerciseId>,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "one")]
    pub error_count: u32,
}

fn one() -> u32 {
    1
}

impl SpellingError {
    /// Dedup key: the lower-cased word.
    #[must_use]
    pub fn key(&self) -> String {
        self.word.trim().to_lowercase()
    }
}

//
// ─── RESULT ENTRY ──────────────────────────────────────────────────────────────
//

/// Canonical result of one exercise (single-suite) or one sub-suite (multi-suite).
///
/// Entries are append-only once received; only `persisted` flips, when the entry
/// was written on its own by a fallback path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEntry {
    /// Namespace used for composite answer keys: the exercise id for single-suite
    /// sessions, the sub-suite id for multi-suite sessions.
    pub entry_key: String,
    pub exercise_id: ExerciseId,
    #[serde(default)]
    pub sub_id: Option<String>,
    pub title: String,
    pub score: ScoreInfo,
    #[serde(default)]
    pub answers: BTreeMap<String, Value>,
    #[serde(default)]
    pub comparison: BTreeMap<String, AnswerComparison>,
    #[serde(default)]
    pub spelling_errors: Vec<SpellingError>,
    pub duration_secs: u64,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub persisted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_from_counts_rounds_percentage() {
        let score = ScoreInfo::from_counts(5, 8);
        assert_eq!(score.percentage, 63);
        assert!((score.accuracy - 0.625).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_score_has_zero_accuracy() {
        let score = ScoreInfo::from_counts(0, 0);
        assert_eq!(score.accuracy, 0.0);
        assert_eq!(score.percentage, 0);
    }

    #[test]
    fn spelling_key_is_case_insensitive() {
        let err = SpellingError {
            word: " Necessary ".into(),
            user_input: "neccesary".into(),
            question_id: None,
            exercise_id: None,
            timestamp: crate::time::fixed_now(),
            error_count: 1,
        };
        assert_eq!(err.key(), "necessary");
    }
}
