//! Batch-at-a-time migration over a whole target.
//!
//! Every public operation is one bounded unit of work. The caller drives the job by
//! feeding `next_offset` back into [`MigrationCoordinator::advance`] until
//! `is_completed` comes back true; nothing here loops or sleeps on its own.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use super::error::MigrationError;
use super::model::{
    clamp_batch_size, BatchReport, FieldMap, JobPhase, JobState, MigrationJob, Record,
    RecordReport, Target, DEFAULT_BATCH_SIZE,
};
use super::rewriter::{FieldRewriter, RecordRewrite};
use super::store::{ImportCountSource, JobStore, PreferenceStore, RecordStore};

const PUBLISH_ATTEMPTS: usize = 3;

/// How the job total is derived from the live count and the pending import count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalPolicy {
    #[default]
    Max,
    Sum,
    LiveOnly,
}

impl TotalPolicy {
    pub fn reconcile(self, live: i64, pending_import: i64) -> i64 {
        let live = live.max(0);
        let pending = pending_import.max(0);
        match self {
            TotalPolicy::Max => live.max(pending),
            TotalPolicy::Sum => live + pending,
            TotalPolicy::LiveOnly => live,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "max" => Some(TotalPolicy::Max),
            "sum" => Some(TotalPolicy::Sum),
            "live" | "live_only" => Some(TotalPolicy::LiveOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub total_policy: TotalPolicy,
    /// Targets whose incoming submissions are rewritten before insert.
    pub live_targets: HashSet<Target>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            total_policy: TotalPolicy::Max,
            live_targets: HashSet::new(),
        }
    }
}

/// External collaborators the coordinator reads from and writes to.
#[derive(Clone)]
pub struct Stores {
    pub records: Arc<dyn RecordStore>,
    pub jobs: Arc<dyn JobStore>,
    pub imports: Arc<dyn ImportCountSource>,
    pub preferences: Arc<dyn PreferenceStore>,
}

pub struct MigrationCoordinator {
    stores: Stores,
    rewriter: FieldRewriter,
    settings: CoordinatorSettings,
}

impl MigrationCoordinator {
    pub fn new(stores: Stores, rewriter: FieldRewriter, settings: CoordinatorSettings) -> Self {
        Self {
            stores,
            rewriter,
            settings,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Begin a job for `target`. Falls back to the saved batch size preference when no
    /// size is requested.
    #[instrument(skip(self, target), fields(target = %target))]
    pub async fn start(
        &self,
        target: &Target,
        requested_batch_size: Option<i64>,
    ) -> Result<MigrationJob, MigrationError> {
        let batch_size = match requested_batch_size {
            Some(size) => clamp_batch_size(size),
            None => self.batch_size_preference().await?,
        };

        if let Some(existing) = self.stores.jobs.load(target).await? {
            if existing.phase == JobPhase::Running {
                return Err(MigrationError::AlreadyRunning {
                    target: target.to_string(),
                });
            }
        }

        let live = self.stores.records.count(target).await?;
        let pending = self.stores.imports.pending_count(target).await?;
        let total = self.settings.total_policy.reconcile(live, pending);

        let state = JobState {
            target: target.clone(),
            phase: JobPhase::Running,
            batch_size,
            total,
            processed: 0,
            next_offset: 0,
            generation: 0,
            updated_at: Utc::now(),
        };
        if !self.stores.jobs.try_begin(&state).await? {
            return Err(MigrationError::AlreadyRunning {
                target: target.to_string(),
            });
        }

        info!(live, pending, total, batch_size, "migration started");
        Ok(self
            .stores
            .jobs
            .load(target)
            .await?
            .unwrap_or(state)
            .into())
    }

    /// Process one page of records starting at `offset`.
    ///
    /// Records are rewritten and saved one at a time, in page order; the first failed
    /// save ends the batch before any later record is fetched. Counters only move once
    /// the whole page is saved, and a replayed call (same offset) never counts its
    /// records twice. Replaying an offset below the cursor of a completed job returns
    /// the completed snapshot without touching any record.
    #[instrument(skip(self, target), fields(target = %target))]
    pub async fn advance(
        &self,
        target: &Target,
        offset: i64,
        batch_size: i64,
    ) -> Result<BatchReport, MigrationError> {
        if offset < 0 {
            return Err(MigrationError::Validation(format!(
                "offset must be non-negative, got {offset}"
            )));
        }
        if batch_size <= 0 {
            return Err(MigrationError::Validation(format!(
                "batch size must be positive, got {batch_size}"
            )));
        }
        let batch_size = clamp_batch_size(batch_size);

        let mut job = match self.stores.jobs.load(target).await? {
            Some(job) if job.phase == JobPhase::Running => job,
            Some(job) if job.phase == JobPhase::Completed && offset < job.next_offset => {
                info!(offset, "batch replayed after completion");
                return Ok(BatchReport {
                    job: job.into(),
                    records: Vec::new(),
                });
            }
            _ => {
                return Err(MigrationError::NotRunning {
                    target: target.to_string(),
                })
            }
        };
        if offset > job.next_offset {
            return Err(MigrationError::Validation(format!(
                "offset {offset} is past the resume cursor {}; records would be skipped",
                job.next_offset
            )));
        }

        let page = self
            .stores
            .records
            .page(target, offset, batch_size)
            .await?;
        let visited = page.len() as i64;

        let mut reports = Vec::with_capacity(page.len());
        for record in page {
            let rewrite = self.rewriter.rewrite(&record).await;
            let saved = rewrite.changed();
            if saved {
                let updated = Record::new(record.id, rewrite.fields);
                if let Err(e) = self.stores.records.save(target, &updated).await {
                    error!(record_id = record.id, offset, error = %e, "record save failed; batch stopped");
                    return Err(e);
                }
            }
            reports.push(RecordReport {
                record_id: record.id,
                saved,
                outcomes: rewrite.outcomes,
            });
        }

        for _ in 0..PUBLISH_ATTEMPTS {
            let next = progressed(&job, offset, batch_size, visited);
            if self.stores.jobs.publish_progress(&next, &job).await? {
                let report = BatchReport {
                    job: next.into(),
                    records: reports,
                };
                info!(
                    offset,
                    visited,
                    processed = report.job.processed,
                    total = report.job.total,
                    migrated = report.migrated(),
                    failed = report.failed(),
                    completed = report.job.is_completed,
                    "batch finished"
                );
                return Ok(report);
            }
            warn!(offset, "job row changed concurrently; re-reading");
            job = self.running_job(target).await?;
        }

        Err(MigrationError::Persistence(format!(
            "could not publish progress for {target} after {PUBLISH_ATTEMPTS} attempts"
        )))
    }

    /// Current persisted state; an idle snapshot when no job was ever started.
    pub async fn status(&self, target: &Target) -> Result<MigrationJob, MigrationError> {
        let state = self
            .stores
            .jobs
            .load(target)
            .await?
            .unwrap_or_else(|| JobState::idle(target.clone()));
        Ok(state.into())
    }

    /// Stop a running job. Idempotent; nothing is kept for resuming.
    #[instrument(skip(self, target), fields(target = %target))]
    pub async fn abort(&self, target: &Target) -> Result<MigrationJob, MigrationError> {
        if self.stores.jobs.abort(target).await? {
            info!("migration aborted");
        }
        self.status(target).await
    }

    /// Release a running job nobody has advanced for `max_age`.
    #[instrument(skip(self, target), fields(target = %target))]
    pub async fn reset_stale(
        &self,
        target: &Target,
        max_age: Duration,
    ) -> Result<bool, MigrationError> {
        let age = chrono::Duration::from_std(max_age)
            .map_err(|e| MigrationError::Validation(format!("max age out of range: {e}")))?;
        let reset = self
            .stores
            .jobs
            .reset_if_stale(target, Utc::now() - age)
            .await?;
        if reset {
            warn!(max_age_secs = max_age.as_secs(), "stale migration reset to idle");
        }
        Ok(reset)
    }

    /// Store the preferred batch size, clamped. Returns the value actually stored.
    pub async fn set_batch_size_preference(&self, size: i64) -> Result<i64, MigrationError> {
        let clamped = clamp_batch_size(size);
        self.stores.preferences.set_batch_size(clamped).await?;
        Ok(clamped)
    }

    pub async fn batch_size_preference(&self) -> Result<i64, MigrationError> {
        Ok(self
            .stores
            .preferences
            .batch_size()
            .await?
            .map(clamp_batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE))
    }

    /// Remember how many submissions a bulk import reported for `target`.
    pub async fn record_import(&self, target: &Target, count: i64) -> Result<(), MigrationError> {
        if count < 0 {
            return Err(MigrationError::Validation(format!(
                "import count must be non-negative, got {count}"
            )));
        }
        self.stores
            .imports
            .record_pending_count(target, count)
            .await?;
        info!(target = %target, count, "import count recorded");
        Ok(())
    }

    /// Rewrite a submission before it is stored, for targets opted into live rewriting.
    pub async fn rewrite_incoming(&self, target: &Target, fields: &FieldMap) -> RecordRewrite {
        if !self.settings.live_targets.contains(target) {
            return RecordRewrite {
                fields: fields.clone(),
                outcomes: Vec::new(),
            };
        }
        self.rewriter.rewrite_fields(fields).await
    }

    async fn running_job(&self, target: &Target) -> Result<JobState, MigrationError> {
        match self.stores.jobs.load(target).await? {
            Some(job) if job.phase == JobPhase::Running => Ok(job),
            _ => Err(MigrationError::NotRunning {
                target: target.to_string(),
            }),
        }
    }
}

fn progressed(job: &JobState, offset: i64, batch_size: i64, visited: i64) -> JobState {
    let processed = job.processed.max(offset + visited);
    let completed = processed >= job.total || visited < batch_size;
    JobState {
        target: job.target.clone(),
        phase: if completed {
            JobPhase::Completed
        } else {
            JobPhase::Running
        },
        batch_size: job.batch_size,
        total: job.total,
        processed,
        next_offset: job.next_offset.max(offset + batch_size),
        generation: job.generation,
        updated_at: Utc::now(),
    }
}
