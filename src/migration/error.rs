use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by coordinator operations.
///
/// Per-URL problems never show up here; they are carried as [`FetchError`]s inside
/// field outcomes so one bad link cannot stall a batch.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("a migration is already running for target {target}")]
    AlreadyRunning { target: String },
    #[error("no migration is running for target {target}")]
    NotRunning { target: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("media storage failure: {0}")]
    Storage(String),
}

impl MigrationError {
    /// Stable machine-readable code for drivers.
    pub fn code(&self) -> &'static str {
        match self {
            MigrationError::Validation(_) => "validation_error",
            MigrationError::AlreadyRunning { .. } => "already_running",
            MigrationError::NotRunning { .. } => "not_running",
            MigrationError::Persistence(_) => "persistence_error",
            MigrationError::Storage(_) => "storage_error",
        }
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(e: sqlx::Error) -> Self {
        MigrationError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(e: serde_json::Error) -> Self {
        MigrationError::Persistence(format!("field map encoding: {e}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Network,
    InvalidImage,
    Storage,
}

/// Why a single remote URL could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("download failed: {0}")]
    Network(String),
    #[error("not a valid image: {0}")]
    InvalidImage(String),
    #[error("could not store image: {0}")]
    Storage(String),
}

impl FetchError {
    pub fn reason(&self) -> FailureReason {
        match self {
            FetchError::Network(_) => FailureReason::Network,
            FetchError::InvalidImage(_) => FailureReason::InvalidImage,
            FetchError::Storage(_) => FailureReason::Storage,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Network(format!("timed out: {e}"))
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

impl From<MigrationError> for FetchError {
    fn from(e: MigrationError) -> Self {
        FetchError::Storage(e.to_string())
    }
}
