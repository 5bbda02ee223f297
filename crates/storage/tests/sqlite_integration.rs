use chrono::Duration;
use std::collections::BTreeMap;
use std::sync::Arc;
use storage::list_file::JsonListRepository;
use storage::repository::{PracticeRecordRepository, Storage};
use storage::sqlite::SqliteRepository;
use suite_core::model::{
    AnswerComparison, ExerciseId, PracticeRecord, RecordId, RecordSource, ScoreInfo, SessionId,
};
use suite_core::time::fixed_now;

fn build_record(id: &str, source: RecordSource, minutes: i64) -> PracticeRecord {
    let mut comparison = BTreeMap::new();
    comparison.insert(
        "p1::q1".to_string(),
        AnswerComparison {
            user_answer: Some("B".into()),
            correct_answer: Some("B".into()),
            is_correct: true,
        },
    );
    PracticeRecord {
        id: RecordId::new(id),
        exercise_id: ExerciseId::new("p1"),
        session_id: Some(SessionId::new("suite_1")),
        title: format!("Record {id}"),
        source,
        score: ScoreInfo::from_counts(8, 10),
        answers: BTreeMap::new(),
        comparison,
        spelling_errors: Vec::new(),
        duration_secs: 300,
        started_at: fixed_now(),
        recorded_at: fixed_now() + Duration::minutes(minutes),
        suite_entries: Vec::new(),
        metadata: serde_json::Map::new(),
    }
}

#[tokio::test]
async fn sqlite_roundtrip_preserves_record_payload() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_records_roundtrip?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let record = build_record("r1", RecordSource::SuiteFallback, 0);
    repo.save_record(&record).await.unwrap();

    let listed = repo.list_records().await.unwrap();
    assert_eq!(listed, vec![record]);
}

#[tokio::test]
async fn sqlite_upserts_lists_in_order_and_deletes() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_records_upsert?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    // Migrations are idempotent.
    repo.migrate().await.expect("migrate twice");

    repo.save_record(&build_record("late", RecordSource::Standalone, 10))
        .await
        .unwrap();
    repo.save_record(&build_record("early", RecordSource::Standalone, 1))
        .await
        .unwrap();
    let mut aggregate = build_record("agg", RecordSource::SuiteMode, 20);
    repo.save_record(&aggregate).await.unwrap();
    aggregate.title = "Renamed".into();
    repo.save_record(&aggregate).await.unwrap();

    let ids: Vec<_> = repo
        .list_records()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id.as_str().to_owned())
        .collect();
    assert_eq!(ids, vec!["early", "late", "agg"]);
    assert_eq!(repo.count_aggregates().await.unwrap(), 1);

    let removed = repo
        .delete_records(&[RecordId::new("early"), RecordId::new("nope")])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(repo.delete_records(&[]).await.unwrap(), 0);
    assert_eq!(repo.list_records().await.unwrap().len(), 2);
}

#[tokio::test]
async fn storage_sqlite_wires_primary_and_fallback() {
    let fallback = JsonListRepository::new(
        std::env::temp_dir().join(format!("suite-storage-{}.json", std::process::id())),
        5,
    );
    let storage = Storage::sqlite(
        "sqlite:file:memdb_records_storage?mode=memory&cache=shared",
        Arc::new(fallback),
    )
    .await
    .expect("storage");
    let names: Vec<_> = storage
        .backends()
        .iter()
        .map(|b| b.backend_name())
        .collect();
    assert_eq!(names, vec!["sqlite", "list_store"]);
}
