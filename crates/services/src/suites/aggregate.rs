//! Folds result entries into one `PracticeRecord`.
//!
//! Every function here is deterministic in its inputs. Maps are ordered and entries of
//! multi-suite sessions are sorted by sub-suite id, so arrival order never shows in
//! the output.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value, json};
use suite_core::model::{
    AnswerComparison, ExerciseId, PracticeRecord, RecordId, RecordSource, ResultEntry, ScoreInfo,
    SessionId, SpellingError,
};

/// Sums `correct` and `total`; accuracy and percentage follow from the sums.
#[must_use]
pub fn aggregate_scores(entries: &[ResultEntry]) -> ScoreInfo {
    let (correct, total) = entries.iter().fold((0_u32, 0_u32), |(c, t), entry| {
        (
            c.saturating_add(entry.score.correct),
            t.saturating_add(entry.score.total),
        )
    });
    ScoreInfo::from_counts(correct, total)
}

/// Composite key `entryKey::questionId`.
#[must_use]
pub fn composite_key(entry_key: &str, question_id: &str) -> String {
    format!("{entry_key}::{question_id}")
}

/// Merged answers and comparisons, keys namespaced by their entry.
#[must_use]
pub fn aggregate_answers(
    entries: &[ResultEntry],
) -> (BTreeMap<String, Value>, BTreeMap<String, AnswerComparison>) {
    let mut answers = BTreeMap::new();
    let mut comparison = BTreeMap::new();
    for entry in entries {
        for (question, answer) in &entry.answers {
            answers.insert(composite_key(&entry.entry_key, question), answer.clone());
        }
        for (question, cmp) in &entry.comparison {
            comparison.insert(composite_key(&entry.entry_key, question), cmp.clone());
        }
    }
    (answers, comparison)
}

/// Whether `candidate` should replace `current` as the representative of a word.
/// Later timestamps win; ties go to the greater input so the merge stays commutative.
fn supersedes(candidate: &SpellingError, current: &SpellingError) -> bool {
    match candidate.timestamp.cmp(&current.timestamp) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => {
            (&candidate.user_input, &candidate.word, &candidate.question_id)
                > (&current.user_input, &current.word, &current.question_id)
        }
    }
}

/// Spelling errors deduplicated by lower-cased word, counts summed, latest input kept.
#[must_use]
pub fn aggregate_spelling(entries: &[ResultEntry]) -> Vec<SpellingError> {
    let mut merged: BTreeMap<String, SpellingError> = BTreeMap::new();
    for error in entries.iter().flat_map(|e| e.spelling_errors.iter()) {
        match merged.entry(error.key()) {
            Entry::Vacant(slot) => {
                slot.insert(error.clone());
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get_mut();
                let count = current.error_count.saturating_add(error.error_count);
                if supersedes(error, current) {
                    *current = error.clone();
                }
                current.error_count = count;
            }
        }
    }
    merged.into_values().collect()
}

#[must_use]
pub fn aggregate_duration(entries: &[ResultEntry]) -> u64 {
    entries
        .iter()
        .fold(0_u64, |acc, e| acc.saturating_add(e.duration_secs))
}

/// `1 +` the number of same-day suite aggregates already persisted.
#[must_use]
pub fn same_day_sequence(existing: &[PracticeRecord], day: NaiveDate) -> usize {
    existing
        .iter()
        .filter(|r| r.source == RecordSource::SuiteMode && r.started_at.date_naive() == day)
        .count()
        + 1
}

/// Title of a single-suite aggregate, e.g. `Reading suite 2023-11-14 #2`.
#[must_use]
pub fn suite_title(type_label: &str, started_at: DateTime<Utc>, existing: &[PracticeRecord]) -> String {
    let day = started_at.date_naive();
    format!(
        "{type_label} suite {} #{}",
        day.format("%Y-%m-%d"),
        same_day_sequence(existing, day)
    )
}

/// Title of a multi-suite aggregate, e.g. `Listening multi-suite listening-100-p1 2023-11-14`.
#[must_use]
pub fn multi_suite_title(type_label: &str, base_id: &str, started_at: DateTime<Utc>) -> String {
    format!(
        "{type_label} multi-suite {base_id} {}",
        started_at.date_naive().format("%Y-%m-%d")
    )
}

/// Numeric ids sort numerically, everything else after them lexically.
fn compare_sub_ids(a: &ResultEntry, b: &ResultEntry) -> Ordering {
    let key = |e: &ResultEntry| {
        let id = e.sub_id.clone().unwrap_or_else(|| e.entry_key.clone());
        match id.parse::<u64>() {
            Ok(n) => (0_u8, n, id),
            Err(_) => (1_u8, 0, id),
        }
    };
    key(a).cmp(&key(b))
}

/// Inputs shared by both aggregate shapes.
#[derive(Debug, Clone)]
pub struct AggregateInput<'a> {
    pub session_id: &'a SessionId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: &'a [ResultEntry],
    pub type_label: &'a str,
}

fn base_record(
    input: &AggregateInput<'_>,
    exercise_id: ExerciseId,
    title: String,
    source: RecordSource,
    entries: Vec<ResultEntry>,
    duration_secs: u64,
    metadata: Map<String, Value>,
) -> PracticeRecord {
    let (answers, comparison) = aggregate_answers(&entries);
    PracticeRecord {
        id: RecordId::aggregate_for(input.session_id),
        exercise_id,
        session_id: Some(input.session_id.clone()),
        title,
        source,
        score: aggregate_scores(&entries),
        answers,
        comparison,
        spelling_errors: aggregate_spelling(&entries),
        duration_secs,
        started_at: input.started_at,
        recorded_at: input.finished_at,
        suite_entries: entries,
        metadata,
    }
}

/// Aggregate of a sequential suite. Entries keep sequence order; duration is the larger
/// of the reported total and the wall-clock span of the session.
#[must_use]
pub fn build_single_suite_record(
    input: &AggregateInput<'_>,
    existing: &[PracticeRecord],
    close_attempts: usize,
) -> PracticeRecord {
    let reported = aggregate_duration(input.entries);
    let wall_clock = u64::try_from((input.finished_at - input.started_at).num_seconds()).unwrap_or(0);
    let sequence: Vec<Value> = input
        .entries
        .iter()
        .map(|e| json!(e.exercise_id.as_str()))
        .collect();
    let mut metadata = Map::new();
    metadata.insert("suiteSequence".into(), Value::Array(sequence));
    metadata.insert("closeAttempts".into(), json!(close_attempts));

    base_record(
        input,
        ExerciseId::new(input.session_id.as_str()),
        suite_title(input.type_label, input.started_at, existing),
        RecordSource::SuiteMode,
        input.entries.to_vec(),
        reported.max(wall_clock),
        metadata,
    )
}

/// Aggregate of a multi-suite session; sub-results are ordered by sub-suite id.
#[must_use]
pub fn build_multi_suite_record(
    input: &AggregateInput<'_>,
    base_id: &str,
    expected_suite_count: Option<u32>,
) -> PracticeRecord {
    let mut entries = input.entries.to_vec();
    entries.sort_by(compare_sub_ids);
    let mut metadata = Map::new();
    metadata.insert("baseExerciseId".into(), json!(base_id));
    metadata.insert("expectedSuiteCount".into(), json!(expected_suite_count));
    metadata.insert("receivedSuiteCount".into(), json!(entries.len()));

    base_record(
        input,
        ExerciseId::new(base_id),
        multi_suite_title(input.type_label, base_id, input.started_at),
        RecordSource::MultiSuite,
        entries.clone(),
        aggregate_duration(&entries),
        metadata,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use suite_core::time::fixed_now;

    fn entry(key: &str, correct: u32, total: u32) -> ResultEntry {
        ResultEntry {
            entry_key: key.into(),
            exercise_id: ExerciseId::new(key),
            sub_id: Some(key.into()),
            title: key.into(),
            score: ScoreInfo::from_counts(correct, total),
            answers: BTreeMap::from([("1".to_string(), json!("A"))]),
            comparison: BTreeMap::from([(
                "1".to_string(),
                AnswerComparison {
                    user_answer: Some("A".into()),
                    correct_answer: Some("A".into()),
                    is_correct: true,
                },
            )]),
            spelling_errors: Vec::new(),
            duration_secs: 100,
            completed_at: fixed_now(),
            metadata: Map::new(),
            persisted: false,
        }
    }

    fn spelling(word: &str, input: &str, offset_secs: i64) -> SpellingError {
        SpellingError {
            word: word.into(),
            user_input: input.into(),
            question_id: None,
            exercise_id: None,
            timestamp: fixed_now() + Duration::seconds(offset_secs),
            error_count: 1,
        }
    }

    #[test]
    fn scores_sum_and_round() {
        let score = aggregate_scores(&[entry("a", 3, 4), entry("b", 2, 4)]);
        assert_eq!((score.correct, score.total, score.percentage), (5, 8, 63));
        assert_eq!(aggregate_scores(&[]).accuracy, 0.0);
    }

    #[test]
    fn answer_keys_are_namespaced_per_entry() {
        let (answers, comparison) = aggregate_answers(&[entry("a", 1, 1), entry("b", 1, 1)]);
        assert_eq!(
            answers.keys().cloned().collect::<Vec<_>>(),
            vec!["a::1".to_string(), "b::1".to_string()]
        );
        assert_eq!(comparison.len(), 2);
    }

    #[test]
    fn spelling_merge_counts_and_keeps_latest_input() {
        let mut a = entry("a", 0, 1);
        a.spelling_errors = vec![spelling("Necessary", "neccesary", 10), spelling("rhythm", "rythm", 0)];
        let mut b = entry("b", 0, 1);
        b.spelling_errors = vec![spelling("necessary", "necesary", 20)];

        let merged = aggregate_spelling(&[a.clone(), b.clone()]);
        assert_eq!(merged.len(), 2);
        let necessary = merged.iter().find(|e| e.key() == "necessary").unwrap();
        assert_eq!(necessary.error_count, 2);
        assert_eq!(necessary.user_input, "necesary");

        assert_eq!(aggregate_spelling(&[b, a]), merged);
    }

    #[test]
    fn spelling_tie_break_is_order_independent() {
        let mut a = entry("a", 0, 1);
        a.spelling_errors = vec![spelling("word", "wrod", 0)];
        let mut b = entry("b", 0, 1);
        b.spelling_errors = vec![spelling("word", "wodr", 0)];
        assert_eq!(
            aggregate_spelling(&[a.clone(), b.clone()]),
            aggregate_spelling(&[b, a])
        );
    }

    #[test]
    fn single_suite_duration_uses_wall_clock_when_larger() {
        let session = SessionId::new("s1");
        let entries = [entry("p1", 8, 10), entry("p2", 7, 10)];
        let input = AggregateInput {
            session_id: &session,
            started_at: fixed_now(),
            finished_at: fixed_now() + Duration::seconds(900),
            entries: &entries,
            type_label: "Reading",
        };
        let record = build_single_suite_record(&input, &[], 0);
        assert_eq!(record.duration_secs, 900);
        assert_eq!(record.title, "Reading suite 2023-11-14 #1");
        assert!(record.is_aggregate());
        assert_eq!(record.id, RecordId::aggregate_for(&session));

        let short = AggregateInput {
            finished_at: fixed_now() + Duration::seconds(10),
            ..input
        };
        assert_eq!(build_single_suite_record(&short, &[], 0).duration_secs, 200);
    }

    #[test]
    fn title_counts_same_day_suite_aggregates() {
        let session = SessionId::new("s0");
        let entries = [entry("p1", 1, 1)];
        let input = AggregateInput {
            session_id: &session,
            started_at: fixed_now(),
            finished_at: fixed_now(),
            entries: &entries,
            type_label: "Reading",
        };
        let earlier = build_single_suite_record(&input, &[], 0);
        let mut other_day = earlier.clone();
        other_day.started_at = fixed_now() - Duration::days(2);
        let mut standalone = earlier.clone();
        standalone.source = RecordSource::Standalone;

        let title = suite_title("Reading", fixed_now(), &[earlier, other_day, standalone]);
        assert_eq!(title, "Reading suite 2023-11-14 #2");
    }

    #[test]
    fn multi_suite_sorts_sub_ids_numerically() {
        let session = SessionId::new("m1");
        let entries = [entry("10", 1, 1), entry("2", 1, 1), entry("x", 1, 1)];
        let input = AggregateInput {
            session_id: &session,
            started_at: fixed_now(),
            finished_at: fixed_now(),
            entries: &entries,
            type_label: "Listening",
        };
        let record = build_multi_suite_record(&input, "listening-100-p1", Some(3));
        let order: Vec<_> = record
            .suite_entries
            .iter()
            .map(|e| e.entry_key.as_str())
            .collect();
        assert_eq!(order, vec!["2", "10", "x"]);
        assert_eq!(record.duration_secs, 300);
        assert_eq!(record.exercise_id, ExerciseId::new("listening-100-p1"));
    }
}
