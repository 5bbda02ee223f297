use suite_core::model::{PracticeRecord, RecordId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{map_record_row, record_to_payload, source_to_str};
use crate::repository::{PracticeRecordRepository, StorageError};

fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait::async_trait]
impl PracticeRecordRepository for SqliteRepository {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn save_record(&self, record: &PracticeRecord) -> Result<(), StorageError> {
        let payload = record_to_payload(record)?;

        sqlx::query(
            r"
                INSERT INTO practice_records (
                    id, exercise_id, session_id, source, is_aggregate, recorded_at, payload
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(id) DO UPDATE SET
                    exercise_id = excluded.exercise_id,
                    session_id = excluded.session_id,
                    source = excluded.source,
                    is_aggregate = excluded.is_aggregate,
                    recorded_at = excluded.recorded_at,
                    payload = excluded.payload
            ",
        )
        .bind(record.id.as_str())
        .bind(record.exercise_id.as_str())
        .bind(record.session_id.as_ref().map(|s| s.as_str().to_owned()))
        .bind(source_to_str(record.source))
        .bind(i64::from(record.is_aggregate()))
        .bind(record.recorded_at)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn list_records(&self) -> Result<Vec<PracticeRecord>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT id, payload
                FROM practice_records
                ORDER BY recorded_at ASC, rowid ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_record_row(&row)?);
        }
        Ok(out)
    }

    async fn delete_records(&self, ids: &[RecordId]) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut sql = String::from("DELETE FROM practice_records WHERE id IN (");
        for i in 0..ids.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('?');
            sql.push_str(&(i + 1).to_string());
        }
        sql.push(')');

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id.as_str());
        }

        let res = query.execute(&self.pool).await.map_err(conn)?;
        usize::try_from(res.rows_affected())
            .map_err(|_| StorageError::Serialization("rows_affected overflow".into()))
    }
}

impl SqliteRepository {
    /// Number of stored aggregate records.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the query fails.
    pub async fn count_aggregates(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM practice_records WHERE is_aggregate = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(conn)?;
        let n: i64 = row.try_get("n").map_err(conn)?;
        u64::try_from(n).map_err(|_| StorageError::Serialization(format!("invalid count: {n}")))
    }
}
