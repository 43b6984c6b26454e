use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use entry_image_migrator::cli::{drive, seed};
use entry_image_migrator::logging::init_tracing;
use entry_image_migrator::migration::model::Target;
use entry_image_migrator::util::env;
use entry_image_migrator::{MigrationService, MigratorConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "migrator",
    version,
    about = "Move remote images referenced by form submissions into the local media library"
)]
struct Cli {
    /// Optional override for MIGRATOR_DB_URL
    #[arg(long, global = true)]
    db_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Start a migration job for a target
    Start {
        target: String,
        /// Batch size for this job (default: saved preference)
        #[arg(long)]
        batch_size: Option<i64>,
    },
    /// Process one batch of a running job
    Batch {
        target: String,
        #[arg(long)]
        offset: i64,
        #[arg(long, default_value_t = 50)]
        batch_size: i64,
    },
    /// Print the persisted job state
    Status { target: String },
    /// Start (or resume) and advance a job until it completes
    Run {
        target: String,
        #[arg(long)]
        batch_size: Option<i64>,
        /// Continue an already running job from its cursor
        #[arg(long, default_value_t = false)]
        resume: bool,
    },
    /// Stop a running job
    Abort { target: String },
    /// Release a running job nobody has advanced recently
    ResetStale {
        target: String,
        /// Age threshold in seconds (default: MIGRATOR_STALE_AFTER_SECS)
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
    /// Save the preferred batch size
    SetBatchSize { size: i64 },
    /// Record how many submissions a bulk import reported for a target
    NoteImport { target: String, count: i64 },
    /// Load a JSON array of submissions for a target
    Seed { target: String, file: PathBuf },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn target(raw: &str) -> Result<Target> {
    Target::parse(raw).with_context(|| format!("invalid target {raw:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing("info,sqlx=warn")?;
    env::bootstrap_cli("migrator");

    let cli = Cli::parse();
    let mut cfg = MigratorConfig::from_env()?;
    if let Some(url) = cli.db_url {
        cfg.database_url = url;
    }
    let svc = MigrationService::connect(&cfg).await?;
    let coordinator = &svc.coordinator;

    match cli.command {
        Commands::Start { target: t, batch_size } => {
            print_json(&coordinator.start(&target(&t)?, batch_size).await?)?;
        }
        Commands::Batch {
            target: t,
            offset,
            batch_size,
        } => {
            print_json(&coordinator.advance(&target(&t)?, offset, batch_size).await?)?;
        }
        Commands::Status { target: t } => {
            print_json(&coordinator.status(&target(&t)?).await?)?;
        }
        Commands::Run {
            target: t,
            batch_size,
            resume,
        } => {
            let (job, summary) = drive::run(
                coordinator,
                drive::RunConfig {
                    target: target(&t)?,
                    batch_size,
                    resume,
                },
            )
            .await?;
            println!(
                "completed {}: {}/{} records, {} batches, {} images migrated, {} failed",
                job.target,
                job.processed,
                job.total,
                summary.batches,
                summary.migrated,
                summary.failed
            );
        }
        Commands::Abort { target: t } => {
            print_json(&coordinator.abort(&target(&t)?).await?)?;
        }
        Commands::ResetStale {
            target: t,
            max_age_secs,
        } => {
            let max_age = max_age_secs
                .map(Duration::from_secs)
                .unwrap_or(svc.stale_after);
            let reset = coordinator.reset_stale(&target(&t)?, max_age).await?;
            info!(reset, "stale check finished");
            println!("{}", if reset { "reset" } else { "unchanged" });
        }
        Commands::SetBatchSize { size } => {
            let stored = coordinator.set_batch_size_preference(size).await?;
            println!("batch size preference: {stored}");
        }
        Commands::NoteImport { target: t, count } => {
            coordinator.record_import(&target(&t)?, count).await?;
        }
        Commands::Seed { target: t, file } => {
            let n = seed::run(&svc.records, &target(&t)?, &file).await?;
            println!("seeded {n} submissions");
        }
    }

    Ok(())
}
