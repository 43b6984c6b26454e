//! Runtime configuration read from the environment (and `.env`).

use anyhow::{anyhow, bail, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::database_ops::db::Db;
use crate::database_ops::job_state::SqliteJobStore;
use crate::database_ops::media_library::{LocalMediaLibrary, UPLOADS_DIR};
use crate::database_ops::submissions::SqliteRecordStore;
use crate::migration::classifier::{UrlClassifier, DEFAULT_LOCAL_MARKER};
use crate::migration::model::Target;
use crate::migration::{
    CoordinatorSettings, FetcherSettings, FieldRewriter, HttpImageFetcher, MigrationCoordinator,
    Stores, TotalPolicy,
};
use crate::util::env::{env_list, env_opt, env_parse};

pub const DEFAULT_DB_URL: &str = "sqlite://migrator.db?mode=rwc";

#[derive(Debug, Clone)]
pub struct MigratorConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub media_root: PathBuf,
    pub media_base_url: String,
    pub local_marker: String,
    pub http_timeout: Duration,
    pub max_image_bytes: u64,
    pub concurrency: usize,
    pub total_policy: TotalPolicy,
    pub stale_after: Duration,
    pub live_targets: HashSet<Target>,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        let fetch = FetcherSettings::default();
        Self {
            database_url: DEFAULT_DB_URL.to_string(),
            max_connections: 5,
            media_root: PathBuf::from("./media"),
            media_base_url: "http://localhost:8080/media".to_string(),
            local_marker: DEFAULT_LOCAL_MARKER.to_string(),
            http_timeout: fetch.timeout,
            max_image_bytes: fetch.max_bytes,
            concurrency: 4,
            total_policy: TotalPolicy::Max,
            stale_after: Duration::from_secs(3600),
            live_targets: HashSet::new(),
        }
    }
}

impl MigratorConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let total_policy = match env_opt("MIGRATOR_TOTAL_POLICY") {
            Some(raw) => TotalPolicy::parse(&raw)
                .ok_or_else(|| anyhow!("MIGRATOR_TOTAL_POLICY must be max, sum or live; got {raw:?}"))?,
            None => d.total_policy,
        };
        let live_targets = env_list("MIGRATOR_LIVE_TARGETS")
            .iter()
            .map(|raw| Target::parse(raw).map_err(|e| anyhow!("MIGRATOR_LIVE_TARGETS: {e}")))
            .collect::<Result<HashSet<_>>>()?;

        let cfg = Self {
            database_url: env_opt("MIGRATOR_DB_URL").unwrap_or(d.database_url),
            max_connections: env_parse("MIGRATOR_DB_MAX_CONNECTIONS", d.max_connections),
            media_root: env_opt("MIGRATOR_MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(d.media_root),
            media_base_url: env_opt("MIGRATOR_MEDIA_BASE_URL").unwrap_or(d.media_base_url),
            local_marker: env_opt("MIGRATOR_LOCAL_MARKER").unwrap_or(d.local_marker),
            http_timeout: Duration::from_secs(env_parse(
                "MIGRATOR_HTTP_TIMEOUT_SECS",
                d.http_timeout.as_secs(),
            )),
            max_image_bytes: env_parse("MIGRATOR_MAX_IMAGE_BYTES", d.max_image_bytes),
            concurrency: env_parse("MIGRATOR_BATCH_CONCURRENCY", d.concurrency).max(1),
            total_policy,
            stale_after: Duration::from_secs(env_parse(
                "MIGRATOR_STALE_AFTER_SECS",
                d.stale_after.as_secs(),
            )),
            live_targets,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// URLs handed out by the media library must be recognised as local again,
    /// otherwise a second pass would re-download everything it just migrated.
    pub fn validate(&self) -> Result<()> {
        if self.local_marker.is_empty() {
            bail!("MIGRATOR_LOCAL_MARKER must not be empty");
        }
        let produced = format!(
            "{}/{UPLOADS_DIR}/",
            self.media_base_url.trim_end_matches('/')
        );
        if !produced.contains(&self.local_marker) {
            bail!(
                "MIGRATOR_LOCAL_MARKER {:?} does not occur in stored media URLs ({produced}...)",
                self.local_marker
            );
        }
        Ok(())
    }
}

/// Everything a driver needs: the coordinator plus the concrete stores behind it.
#[derive(Clone)]
pub struct MigrationService {
    pub db: Db,
    pub records: Arc<SqliteRecordStore>,
    pub coordinator: Arc<MigrationCoordinator>,
    pub media_root: PathBuf,
    pub stale_after: Duration,
}

impl MigrationService {
    pub async fn connect(cfg: &MigratorConfig) -> Result<Self> {
        cfg.validate()?;
        let db = Db::connect(&cfg.database_url, cfg.max_connections).await?;
        Ok(Self::with_db(db, cfg))
    }

    /// Wire the SQLite stores, local media library and HTTP fetcher around `db`.
    pub fn with_db(db: Db, cfg: &MigratorConfig) -> Self {
        let records = Arc::new(SqliteRecordStore::new(db.clone()));
        let jobs = Arc::new(SqliteJobStore::new(db.clone()));
        let media = Arc::new(LocalMediaLibrary::new(
            db.clone(),
            cfg.media_root.clone(),
            &cfg.media_base_url,
        ));
        let fetcher = Arc::new(HttpImageFetcher::new(
            media,
            FetcherSettings {
                timeout: cfg.http_timeout,
                max_bytes: cfg.max_image_bytes,
                temp_dir: None,
            },
        ));
        let rewriter = FieldRewriter::new(UrlClassifier::new(cfg.local_marker.clone()), fetcher)
            .with_concurrency(cfg.concurrency);
        let stores = Stores {
            records: records.clone(),
            jobs: jobs.clone(),
            imports: jobs.clone(),
            preferences: jobs,
        };
        let coordinator = MigrationCoordinator::new(
            stores,
            rewriter,
            CoordinatorSettings {
                total_policy: cfg.total_policy,
                live_targets: cfg.live_targets.clone(),
            },
        );
        Self {
            db,
            records,
            coordinator: Arc::new(coordinator),
            media_root: cfg.media_root.clone(),
            stale_after: cfg.stale_after,
        }
    }
}
