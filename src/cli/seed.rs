//! Load submissions from a JSON file (an array of field objects) into the record store.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::database_ops::submissions::SqliteRecordStore;
use crate::migration::model::{FieldMap, Target};

pub async fn run(records: &SqliteRecordStore, target: &Target, path: &Path) -> Result<usize> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    let rows: Vec<FieldMap> = serde_json::from_str(&raw)
        .with_context(|| format!("{} must hold a JSON array of objects", path.display()))?;

    for fields in &rows {
        records.insert(target, fields).await?;
    }
    info!(target = %target, inserted = rows.len(), "submissions seeded");
    Ok(rows.len())
}
