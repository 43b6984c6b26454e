//! Records, jobs and per-field outcomes shared by the migration engine.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::error::{FailureReason, FetchError, MigrationError};

pub type RecordId = i64;

/// Ordered field-name → value mapping of one submission.
pub type FieldMap = IndexMap<String, FieldValue>;

pub const MIN_BATCH_SIZE: i64 = 10;
pub const MAX_BATCH_SIZE: i64 = 200;
pub const DEFAULT_BATCH_SIZE: i64 = 50;

/// Clamp any requested batch size into `[MIN_BATCH_SIZE, MAX_BATCH_SIZE]`.
pub fn clamp_batch_size(requested: i64) -> i64 {
    requested.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}

/// One value of a submission's field map.
///
/// Only `Scalar` values are ever inspected for remote image URLs; everything else
/// is carried through untouched and serializes back to the exact JSON it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum FieldValue {
    Absent,
    Scalar(String),
    Nested(Value),
    Literal(Value),
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            FieldValue::Scalar(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => FieldValue::Absent,
            Value::String(s) => FieldValue::Scalar(s),
            Value::Array(_) | Value::Object(_) => FieldValue::Nested(v),
            other => FieldValue::Literal(other),
        }
    }
}

impl From<FieldValue> for Value {
    fn from(v: FieldValue) -> Self {
        match v {
            FieldValue::Absent => Value::Null,
            FieldValue::Scalar(s) => Value::String(s),
            FieldValue::Nested(v) | FieldValue::Literal(v) => v,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Scalar(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub fields: FieldMap,
}

impl Record {
    pub fn new(id: RecordId, fields: FieldMap) -> Self {
        Self { id, fields }
    }
}

/// Identifier of the record collection being migrated (e.g. one form's submissions).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target(String);

impl Target {
    pub const MAX_LEN: usize = 64;

    pub fn parse(raw: &str) -> Result<Self, MigrationError> {
        let t = raw.trim();
        if t.is_empty() {
            return Err(MigrationError::Validation("target must not be empty".into()));
        }
        if t.len() > Self::MAX_LEN {
            return Err(MigrationError::Validation(format!(
                "target longer than {} characters",
                Self::MAX_LEN
            )));
        }
        if !t
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(MigrationError::Validation(format!(
                "target {t:?} may only contain ASCII letters, digits, '-', '_' and '.'"
            )));
        }
        Ok(Self(t.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Target {
    type Error = MigrationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Target::parse(&s)
    }
}

impl From<Target> for String {
    fn from(t: Target) -> Self {
        t.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Idle,
    Running,
    Completed,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Idle => "idle",
            JobPhase::Running => "running",
            JobPhase::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "idle" => Some(JobPhase::Idle),
            "running" => Some(JobPhase::Running),
            "completed" => Some(JobPhase::Completed),
            _ => None,
        }
    }
}

/// Persisted per-target job row.
#[derive(Debug, Clone, PartialEq)]
pub struct JobState {
    pub target: Target,
    pub phase: JobPhase,
    pub batch_size: i64,
    pub total: i64,
    pub processed: i64,
    pub next_offset: i64,
    /// Bumped every time a job is (re)started for the target.
    pub generation: i64,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    pub fn idle(target: Target) -> Self {
        Self {
            target,
            phase: JobPhase::Idle,
            batch_size: DEFAULT_BATCH_SIZE,
            total: 0,
            processed: 0,
            next_offset: 0,
            generation: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Snapshot of a migration job handed back to drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationJob {
    pub target: Target,
    pub phase: JobPhase,
    pub batch_size: i64,
    pub total: i64,
    pub processed: i64,
    pub running: bool,
    pub next_offset: i64,
    pub is_completed: bool,
    pub updated_at: DateTime<Utc>,
}

impl MigrationJob {
    /// Completed percentage, capped at 100.
    pub fn percent(&self) -> u8 {
        if self.is_completed {
            return 100;
        }
        if self.total <= 0 {
            return 0;
        }
        ((self.processed.max(0) * 100) / self.total).min(100) as u8
    }
}

impl From<JobState> for MigrationJob {
    fn from(s: JobState) -> Self {
        Self {
            running: s.phase == JobPhase::Running,
            is_completed: s.phase == JobPhase::Completed,
            target: s.target,
            phase: s.phase,
            batch_size: s.batch_size,
            total: s.total,
            processed: s.processed,
            next_offset: s.next_offset,
            updated_at: s.updated_at,
        }
    }
}

/// A field value suspected of pointing at a remote image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub field_name: String,
    pub original_url: String,
}

/// Locally resolvable reference returned by the media store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMedia {
    pub id: i64,
    pub url: String,
}

/// Per-URL result of one fetch. Failures never abort a batch.
pub type FetchResult = Result<StoredMedia, FetchError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldOutcome {
    pub field: String,
    pub original_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FieldOutcome {
    pub fn migrated(candidate: Candidate, local_url: String) -> Self {
        Self {
            field: candidate.field_name,
            original_url: candidate.original_url,
            local_url: Some(local_url),
            reason: None,
            message: None,
        }
    }

    pub fn failed(candidate: Candidate, err: &FetchError) -> Self {
        Self {
            field: candidate.field_name,
            original_url: candidate.original_url,
            local_url: None,
            reason: Some(err.reason()),
            message: Some(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.local_url.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordReport {
    pub record_id: RecordId,
    pub saved: bool,
    pub outcomes: Vec<FieldOutcome>,
}

/// Result of one `advance` call: the updated job plus what happened per record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub job: MigrationJob,
    pub records: Vec<RecordReport>,
}

impl BatchReport {
    pub fn migrated(&self) -> usize {
        self.outcomes().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes().filter(|o| !o.is_success()).count()
    }

    fn outcomes(&self) -> impl Iterator<Item = &FieldOutcome> {
        self.records.iter().flat_map(|r| r.outcomes.iter())
    }
}
