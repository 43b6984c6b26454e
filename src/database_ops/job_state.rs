//! Persisted job rows, pending import counts and the batch size preference.
//!
//! Mutual exclusion between invocations lives entirely in the SQL predicates below
//! (`WHERE phase <> 'running'`, `WHERE generation = ? AND processed = ?`), never in
//! process memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{now_millis, Db};
use crate::migration::error::MigrationError;
use crate::migration::model::{JobPhase, JobState, Target};
use crate::migration::store::{ImportCountSource, JobStore, PreferenceStore, StoreResult};

const BATCH_SIZE_KEY: &str = "batch_size";

#[derive(Clone)]
pub struct SqliteJobStore {
    db: Db,
}

impl SqliteJobStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn decode(row: SqliteRow) -> StoreResult<JobState> {
    let raw_target: String = row.get("target");
    let raw_phase: String = row.get("phase");
    let phase = JobPhase::parse(&raw_phase).ok_or_else(|| {
        MigrationError::Persistence(format!("unknown job phase {raw_phase:?} for {raw_target}"))
    })?;
    Ok(JobState {
        target: Target::parse(&raw_target)?,
        phase,
        batch_size: row.get("batch_size"),
        total: row.get("total"),
        processed: row.get("processed"),
        next_offset: row.get("next_offset"),
        generation: row.get("generation"),
        updated_at: from_millis(row.get("updated_at")),
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn load(&self, target: &Target) -> StoreResult<Option<JobState>> {
        let row = sqlx::query(
            "SELECT target, phase, batch_size, total, processed, next_offset, generation, updated_at \
             FROM migration_jobs WHERE target = ?1",
        )
        .bind(target.as_str())
        .fetch_optional(&self.db.pool)
        .await?;
        row.map(decode).transpose()
    }

    async fn try_begin(&self, state: &JobState) -> StoreResult<bool> {
        let res = sqlx::query(
            "INSERT INTO migration_jobs \
                 (target, phase, batch_size, total, processed, next_offset, generation, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7) \
             ON CONFLICT(target) DO UPDATE SET \
                 phase = excluded.phase, \
                 batch_size = excluded.batch_size, \
                 total = excluded.total, \
                 processed = excluded.processed, \
                 next_offset = excluded.next_offset, \
                 generation = migration_jobs.generation + 1, \
                 updated_at = excluded.updated_at \
             WHERE migration_jobs.phase <> 'running'",
        )
        .bind(state.target.as_str())
        .bind(state.phase.as_str())
        .bind(state.batch_size)
        .bind(state.total)
        .bind(state.processed)
        .bind(state.next_offset)
        .bind(state.updated_at.timestamp_millis())
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn publish_progress(&self, next: &JobState, expected: &JobState) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE migration_jobs \
             SET phase = ?1, processed = ?2, next_offset = ?3, updated_at = ?4 \
             WHERE target = ?5 AND phase = 'running' \
               AND generation = ?6 AND processed = ?7 AND next_offset = ?8",
        )
        .bind(next.phase.as_str())
        .bind(next.processed)
        .bind(next.next_offset)
        .bind(next.updated_at.timestamp_millis())
        .bind(expected.target.as_str())
        .bind(expected.generation)
        .bind(expected.processed)
        .bind(expected.next_offset)
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn abort(&self, target: &Target) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE migration_jobs SET phase = 'idle', updated_at = ?1 \
             WHERE target = ?2 AND phase = 'running'",
        )
        .bind(now_millis())
        .bind(target.as_str())
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn reset_if_stale(&self, target: &Target, cutoff: DateTime<Utc>) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE migration_jobs SET phase = 'idle', updated_at = ?1 \
             WHERE target = ?2 AND phase = 'running' AND updated_at < ?3",
        )
        .bind(now_millis())
        .bind(target.as_str())
        .bind(cutoff.timestamp_millis())
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }
}

#[async_trait]
impl ImportCountSource for SqliteJobStore {
    async fn pending_count(&self, target: &Target) -> StoreResult<i64> {
        let n: Option<i64> =
            sqlx::query_scalar("SELECT pending FROM import_counts WHERE target = ?1")
                .bind(target.as_str())
                .fetch_optional(&self.db.pool)
                .await?;
        Ok(n.unwrap_or(0))
    }

    async fn record_pending_count(&self, target: &Target, count: i64) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO import_counts (target, pending, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(target) DO UPDATE SET pending = excluded.pending, updated_at = excluded.updated_at",
        )
        .bind(target.as_str())
        .bind(count)
        .bind(now_millis())
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for SqliteJobStore {
    async fn batch_size(&self) -> StoreResult<Option<i64>> {
        let v: Option<i64> = sqlx::query_scalar("SELECT value FROM migrator_settings WHERE key = ?1")
            .bind(BATCH_SIZE_KEY)
            .fetch_optional(&self.db.pool)
            .await?;
        Ok(v)
    }

    async fn set_batch_size(&self, size: i64) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO migrator_settings (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(BATCH_SIZE_KEY)
        .bind(size)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }
}
