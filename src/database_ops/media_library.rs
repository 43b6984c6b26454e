//! Filesystem-backed media library.
//!
//! Files land under `<root>/uploads/<YYYY>/<MM>/`, every stored image gets a
//! `media_attachments` row, and the public URL is `<base_url>/uploads/<YYYY>/<MM>/<name>`.
//! Name collisions are resolved with `-1`, `-2`, ... suffixes before the extension.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Datelike, Utc};
use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use super::db::{now_millis, Db};
use crate::migration::error::MigrationError;
use crate::migration::model::StoredMedia;
use crate::migration::store::{MediaStore, StoreResult};

pub const UPLOADS_DIR: &str = "uploads";
const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Clone)]
pub struct LocalMediaLibrary {
    db: Db,
    root: PathBuf,
    base_url: String,
}

impl LocalMediaLibrary {
    pub fn new(db: Db, root: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            db,
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the file exclusively, bumping the suffix until a free name is found.
    async fn create_unique(
        &self,
        dir: &Path,
        filename: &str,
    ) -> StoreResult<(String, tokio::fs::File)> {
        let (stem, ext) = split_name(filename);
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = match (attempt, ext) {
                (0, _) => filename.to_string(),
                (n, Some(ext)) => format!("{stem}-{n}.{ext}"),
                (n, None) => format!("{stem}-{n}"),
            };
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(dir.join(&candidate))
                .await
            {
                Ok(file) => return Ok((candidate, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(MigrationError::Storage(format!(
                        "create {}: {e}",
                        dir.join(&candidate).display()
                    )))
                }
            }
        }
        Err(MigrationError::Storage(format!(
            "no free file name for {filename} in {}",
            dir.display()
        )))
    }
}

fn split_name(filename: &str) -> (&str, Option<&str>) {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (filename, None),
    }
}

fn dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

#[async_trait]
impl MediaStore for LocalMediaLibrary {
    #[instrument(skip(self, bytes))]
    async fn store(
        &self,
        bytes: Bytes,
        filename: &str,
        mime_type: &str,
    ) -> StoreResult<StoredMedia> {
        let now = Utc::now();
        let relative_dir = format!("{UPLOADS_DIR}/{:04}/{:02}", now.year(), now.month());
        let dir = self.root.join(&relative_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| MigrationError::Storage(format!("create {}: {e}", dir.display())))?;

        let (name, mut file) = self.create_unique(&dir, filename).await?;
        let path = dir.join(&name);
        let written = async {
            file.write_all(&bytes).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(MigrationError::Storage(format!(
                "write {}: {e}",
                path.display()
            )));
        }

        let relative_path = format!("{relative_dir}/{name}");
        let url = format!("{}/{relative_path}", self.base_url);
        let title = split_name(&name).0.to_string();
        let (width, height) = match dimensions(&bytes) {
            Some((w, h)) => (Some(i64::from(w)), Some(i64::from(h))),
            None => (None, None),
        };

        let inserted: Result<i64, sqlx::Error> = sqlx::query_scalar(
            "INSERT INTO media_attachments \
                 (title, file_name, relative_path, mime_type, byte_size, width, height, url, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) RETURNING id",
        )
        .bind(&title)
        .bind(&name)
        .bind(&relative_path)
        .bind(mime_type)
        .bind(bytes.len() as i64)
        .bind(width)
        .bind(height)
        .bind(&url)
        .bind(now_millis())
        .fetch_one(&self.db.pool)
        .await;

        match inserted {
            Ok(id) => {
                debug!(id, %url, "media stored");
                Ok(StoredMedia { id, url })
            }
            Err(e) => {
                // No row points at the file, so it would be orphaned.
                let _ = tokio::fs::remove_file(&path).await;
                Err(MigrationError::Storage(format!("media attachment row: {e}")))
            }
        }
    }
}
