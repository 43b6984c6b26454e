//! SQLite-backed submission records (`submissions.response` holds the JSON field map).

use async_trait::async_trait;
use sqlx::Row;
use tracing::warn;

use super::db::{now_millis, Db};
use crate::migration::error::MigrationError;
use crate::migration::model::{FieldMap, Record, RecordId, Target};
use crate::migration::store::{RecordStore, StoreResult};

#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Db,
}

impl SqliteRecordStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn insert(&self, target: &Target, fields: &FieldMap) -> StoreResult<RecordId> {
        let response = serde_json::to_string(fields)?;
        let now = now_millis();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO submissions (target, response, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?3) RETURNING id",
        )
        .bind(target.as_str())
        .bind(response)
        .bind(now)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(id)
    }

    pub async fn get(&self, target: &Target, id: RecordId) -> StoreResult<Option<Record>> {
        let row = sqlx::query("SELECT id, response FROM submissions WHERE target = ?1 AND id = ?2")
            .bind(target.as_str())
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await?;
        Ok(row.map(|r| decode(r.get("id"), r.get("response"))))
    }
}

/// Malformed payloads become empty field maps: still visited, never rewritten.
fn decode(id: RecordId, response: String) -> Record {
    match serde_json::from_str::<FieldMap>(&response) {
        Ok(fields) => Record::new(id, fields),
        Err(e) => {
            warn!(record_id = id, error = %e, "submission response is not a JSON object; skipping fields");
            Record::new(id, FieldMap::new())
        }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn count(&self, target: &Target) -> StoreResult<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions WHERE target = ?1")
            .bind(target.as_str())
            .fetch_one(&self.db.pool)
            .await?;
        Ok(n)
    }

    async fn page(&self, target: &Target, offset: i64, limit: i64) -> StoreResult<Vec<Record>> {
        let rows = sqlx::query(
            "SELECT id, response FROM submissions WHERE target = ?1 \
             ORDER BY id ASC LIMIT ?2 OFFSET ?3",
        )
        .bind(target.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| decode(r.get("id"), r.get("response")))
            .collect())
    }

    async fn save(&self, target: &Target, record: &Record) -> StoreResult<()> {
        let response = serde_json::to_string(&record.fields)?;
        let res = sqlx::query(
            "UPDATE submissions SET response = ?1, updated_at = ?2 WHERE target = ?3 AND id = ?4",
        )
        .bind(response)
        .bind(now_millis())
        .bind(target.as_str())
        .bind(record.id)
        .execute(&self.db.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(MigrationError::Persistence(format!(
                "submission {} not found for target {target}",
                record.id
            )));
        }
        Ok(())
    }
}
