//! Drive one target's migration to completion from a single process.
//!
//! Each iteration is one bounded `advance` call, so an interrupted run can be
//! picked up again with `resume` from the persisted cursor.

use anyhow::{Context, Result};
use tracing::info;

use crate::migration::error::MigrationError;
use crate::migration::model::{MigrationJob, Target};
use crate::migration::MigrationCoordinator;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target: Target,
    /// Saved as the preference before starting; the stored preference is used when `None`.
    pub batch_size: Option<i64>,
    /// Continue an already running job instead of failing with `AlreadyRunning`.
    pub resume: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: u64,
    pub migrated: usize,
    pub failed: usize,
}

pub async fn run(
    coordinator: &MigrationCoordinator,
    cfg: RunConfig,
) -> Result<(MigrationJob, RunSummary)> {
    if let Some(size) = cfg.batch_size {
        let stored = coordinator.set_batch_size_preference(size).await?;
        info!(batch_size = stored, "batch size preference saved");
    }

    let mut job = match coordinator.start(&cfg.target, None).await {
        Ok(job) => job,
        Err(MigrationError::AlreadyRunning { .. }) if cfg.resume => {
            let job = coordinator.status(&cfg.target).await?;
            info!(
                target = %cfg.target,
                next_offset = job.next_offset,
                processed = job.processed,
                "resuming running migration"
            );
            job
        }
        Err(e) => return Err(e).context(format!("start migration for {}", cfg.target)),
    };

    let mut summary = RunSummary::default();
    while !job.is_completed {
        let report = coordinator
            .advance(&cfg.target, job.next_offset, job.batch_size)
            .await
            .with_context(|| format!("batch at offset {} for {}", job.next_offset, cfg.target))?;
        summary.batches += 1;
        summary.migrated += report.migrated();
        summary.failed += report.failed();
        job = report.job;
        info!(
            target = %cfg.target,
            percent = job.percent(),
            processed = job.processed,
            total = job.total,
            "migration progress"
        );
    }

    info!(
        target = %cfg.target,
        batches = summary.batches,
        migrated = summary.migrated,
        failed = summary.failed,
        "migration complete"
    );
    Ok((job, summary))
}
