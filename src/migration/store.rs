//! Narrow contracts for the collaborators the engine talks to.
//!
//! The SQLite and filesystem implementations live in `database_ops`; tests swap in
//! in-memory fakes.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::error::MigrationError;
use super::model::{JobState, Record, StoredMedia, Target};

pub type StoreResult<T> = Result<T, MigrationError>;

/// Paginated read/write access to submission records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn count(&self, target: &Target) -> StoreResult<i64>;

    /// Up to `limit` records starting at `offset`, in ascending id order.
    async fn page(&self, target: &Target, offset: i64, limit: i64) -> StoreResult<Vec<Record>>;

    async fn save(&self, target: &Target, record: &Record) -> StoreResult<()>;
}

/// Durable home for validated image bytes.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn store(&self, bytes: Bytes, filename: &str, mime_type: &str)
        -> StoreResult<StoredMedia>;
}

/// Count of submissions reported by a bulk import that may not be live yet.
#[async_trait]
pub trait ImportCountSource: Send + Sync {
    async fn pending_count(&self, target: &Target) -> StoreResult<i64>;

    async fn record_pending_count(&self, target: &Target, count: i64) -> StoreResult<()>;
}

/// Persisted job rows with the compare-and-set primitives the coordinator needs.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self, target: &Target) -> StoreResult<Option<JobState>>;

    /// Atomically install `state` (which must be running) unless a running job already
    /// exists for the target. Returns `false` when another job holds the slot.
    async fn try_begin(&self, state: &JobState) -> StoreResult<bool>;

    /// Replace the row only if it is still the running job `expected` was read from,
    /// with the same generation and counters. Returns `false` when the row moved
    /// underneath us or the job was restarted.
    async fn publish_progress(&self, next: &JobState, expected: &JobState) -> StoreResult<bool>;

    /// Move a running job to idle. Returns whether anything changed.
    async fn abort(&self, target: &Target) -> StoreResult<bool>;

    /// Move a running job to idle only when it was last touched before `cutoff`.
    async fn reset_if_stale(&self, target: &Target, cutoff: DateTime<Utc>) -> StoreResult<bool>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn batch_size(&self) -> StoreResult<Option<i64>>;

    async fn set_batch_size(&self, size: i64) -> StoreResult<()>;
}
