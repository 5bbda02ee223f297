use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use suite_core::model::{AnswerComparison, ExerciseId, ResultEntry, ScoreInfo, SpellingError};

/// Score block as child contexts report it. Counters may arrive as floats.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawScore {
    correct: Option<f64>,
    #[serde(alias = "totalQuestions")]
    total: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSpellingError {
    word: Option<String>,
    #[serde(alias = "input", alias = "userAnswer")]
    user_input: Option<String>,
    question_id: Option<String>,
    /// Milliseconds since the epoch.
    timestamp: Option<f64>,
    error_count: Option<u32>,
}

/// Completion message posted by a child context once an exercise is done.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionPayload {
    #[serde(alias = "subId", alias = "subSuiteId")]
    suite_id: Option<Value>,
    #[serde(alias = "suiteCount", alias = "expectedSuiteCount")]
    total_suites: Option<f64>,
    #[serde(alias = "suiteSessionId")]
    session_id: Option<String>,
    title: Option<String>,
    score_info: Option<RawScore>,
    correct: Option<f64>,
    #[serde(alias = "score")]
    correct_answers: Option<f64>,
    #[serde(alias = "totalQuestions")]
    total: Option<f64>,
    answers: BTreeMap<String, Value>,
    #[serde(alias = "comparison")]
    answer_comparison: BTreeMap<String, AnswerComparison>,
    spelling_errors: Vec<RawSpellingError>,
    /// Seconds.
    duration: Option<f64>,
    metadata: Map<String, Value>,
}

impl CompletionPayload {
    /// Parses an untrusted payload. Malformed payloads degrade to an empty one.
    #[must_use]
    pub fn parse(raw: &Value) -> Self {
        match Self::deserialize(raw) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "malformed completion payload; using defaults");
                Self::default()
            }
        }
    }

    /// The sub-suite id, present only for multi-suite completions.
    #[must_use]
    pub fn suite_id(&self) -> Option<String> {
        match self.suite_id.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Explicit sub-suite count carried on the payload itself.
    #[must_use]
    pub fn total_suites(&self) -> Option<u32> {
        self.total_suites.and_then(count_from_f64).filter(|n| *n > 0)
    }

    /// Sub-suite count carried in the metadata bag.
    #[must_use]
    pub fn metadata_suite_count(&self) -> Option<u32> {
        ["totalSuites", "suiteCount", "expectedSuiteCount"]
            .iter()
            .find_map(|key| self.metadata.get(*key).and_then(Value::as_f64))
            .and_then(count_from_f64)
            .filter(|n| *n > 0)
    }

    /// Session id the child context claims to belong to.
    #[must_use]
    pub fn session_hint(&self) -> Option<&str> {
        self.session_id.as_deref().filter(|s| !s.trim().is_empty())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn count_from_f64(value: f64) -> Option<u32> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value.round().min(f64::from(u32::MAX)) as u32)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn secs_from_f64(value: f64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    value.round() as u64
}

/// Where the entry being normalized belongs.
#[derive(Debug, Clone)]
pub struct EntryTarget<'a> {
    pub entry_key: &'a str,
    pub exercise_id: &'a ExerciseId,
    pub sub_id: Option<&'a str>,
    pub fallback_title: &'a str,
    pub completed_at: DateTime<Utc>,
}

/// Converts raw completion payloads into canonical `ResultEntry` values.
pub struct ResultNormalizer;

impl ResultNormalizer {
    /// Normalize a payload.
    ///
    /// Counters are taken from `scoreInfo`, then top-level fields, then derived from the
    /// comparison map. Accuracy and percentage are always recomputed from the counters.
    #[must_use]
    pub fn normalize(payload: &CompletionPayload, target: &EntryTarget<'_>) -> ResultEntry {
        let score = payload.score_info.clone().unwrap_or_default();

        let derived_correct = u32::try_from(
            payload
                .answer_comparison
                .values()
                .filter(|c| c.is_correct)
                .count(),
        )
        .unwrap_or(u32::MAX);
        let derived_total = u32::try_from(if payload.answer_comparison.is_empty() {
            payload.answers.len()
        } else {
            payload.answer_comparison.len()
        })
        .unwrap_or(u32::MAX);

        let correct = score
            .correct
            .or(payload.correct)
            .or(payload.correct_answers)
            .and_then(count_from_f64)
            .unwrap_or(derived_correct);
        let total = score
            .total
            .or(payload.total)
            .and_then(count_from_f64)
            .unwrap_or(derived_total)
            .max(correct);

        let duration_secs = payload
            .duration
            .or_else(|| payload.metadata.get("duration").and_then(Value::as_f64))
            .map_or(0, secs_from_f64);

        let title = payload
            .title
            .clone()
            .or_else(|| {
                payload
                    .metadata
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
            })
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| target.fallback_title.to_string());

        let spelling_errors = payload
            .spelling_errors
            .iter()
            .filter_map(|raw| normalize_spelling(raw, target))
            .collect();

        ResultEntry {
            entry_key: target.entry_key.to_string(),
            exercise_id: target.exercise_id.clone(),
            sub_id: target.sub_id.map(str::to_owned),
            title,
            score: ScoreInfo::from_counts(correct, total),
            answers: payload.answers.clone(),
            comparison: payload.answer_comparison.clone(),
            spelling_errors,
            duration_secs,
            completed_at: target.completed_at,
            metadata: payload.metadata.clone(),
            persisted: false,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn normalize_spelling(raw: &RawSpellingError, target: &EntryTarget<'_>) -> Option<SpellingError> {
    let word = raw.word.as_deref().map(str::trim).filter(|w| !w.is_empty())?;
    let timestamp = raw
        .timestamp
        .filter(|t| t.is_finite())
        .and_then(|millis| DateTime::<Utc>::from_timestamp_millis(millis as i64))
        .unwrap_or(target.completed_at);
    Some(SpellingError {
        word: word.to_string(),
        user_input: raw.user_input.clone().unwrap_or_default(),
        question_id: raw.question_id.clone(),
        exercise_id: Some(target.exercise_id.clone()),
        timestamp,
        error_count: raw.error_count.unwrap_or(1).max(1),
    })
}
