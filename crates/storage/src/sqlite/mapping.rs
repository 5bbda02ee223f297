use suite_core::model::{PracticeRecord, RecordSource};
use sqlx::Row;

use crate::repository::StorageError;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn source_to_str(source: RecordSource) -> &'static str {
    match source {
        RecordSource::SuiteMode => "suite_mode",
        RecordSource::MultiSuite => "multi_suite",
        RecordSource::SuiteFallback => "suite_fallback",
        RecordSource::Standalone => "standalone",
    }
}

pub(crate) fn record_to_payload(record: &PracticeRecord) -> Result<String, StorageError> {
    serde_json::to_string(record).map_err(ser)
}

/// Rebuilds a record from its JSON payload, checking the indexed columns agree with it.
pub(crate) fn map_record_row(row: &sqlx::sqlite::SqliteRow) -> Result<PracticeRecord, StorageError> {
    let id: String = row.try_get("id").map_err(ser)?;
    let payload: String = row.try_get("payload").map_err(ser)?;
    let record: PracticeRecord = serde_json::from_str(&payload).map_err(ser)?;
    if record.id.as_str() != id {
        return Err(StorageError::Serialization(format!(
            "payload id {} does not match row id {id}",
            record.id
        )));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_names_match_serde_names() {
        for source in [
            RecordSource::SuiteMode,
            RecordSource::MultiSuite,
            RecordSource::SuiteFallback,
            RecordSource::Standalone,
        ] {
            let json = serde_json::to_string(&source).unwrap();
            assert_eq!(json.trim_matches('"'), source_to_str(source));
        }
    }
}
