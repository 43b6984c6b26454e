//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use super::error::{FetchError, MigrationError};
use super::fetcher::ImageFetcher;
use super::model::{FetchResult, Record, StoredMedia, Target};
use super::store::{MediaStore, RecordStore, StoreResult};

pub fn png_bytes() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
        3,
        2,
        image::Rgba([200, 10, 10, 255]),
    ));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}

#[derive(Default)]
pub struct MemoryMediaStore {
    fail: bool,
    next_id: AtomicI64,
    calls: Mutex<Vec<(String, String, usize)>>,
}

impl MemoryMediaStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn store(
        &self,
        bytes: Bytes,
        filename: &str,
        mime_type: &str,
    ) -> StoreResult<StoredMedia> {
        if self.fail {
            return Err(MigrationError::Storage("disk full".into()));
        }
        self.calls
            .lock()
            .unwrap()
            .push((filename.to_string(), mime_type.to_string(), bytes.len()));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StoredMedia {
            id,
            url: format!("https://local.test/uploads/{id}/{filename}"),
        })
    }
}

/// Fetcher that answers from a fixed table and counts calls per URL.
#[derive(Default)]
pub struct ScriptedFetcher {
    answers: HashMap<String, FetchResult>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn ok(mut self, url: &str, local: &str) -> Self {
        self.answers.insert(
            url.to_string(),
            Ok(StoredMedia {
                id: self.answers.len() as i64 + 1,
                url: local.to_string(),
            }),
        );
        self
    }

    pub fn err(mut self, url: &str, err: FetchError) -> Self {
        self.answers.insert(url.to_string(), Err(err));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> FetchResult {
        self.calls.lock().unwrap().push(url.to_string());
        self.answers
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Network("404 Not Found".into())))
    }
}

/// Record store wrapper whose saves can be switched to fail.
pub struct FlakyRecordStore<S> {
    pub inner: S,
    pub fail_saves: AtomicBool,
    pub saves: AtomicI64,
}

impl<S> FlakyRecordStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_saves: AtomicBool::new(false),
            saves: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl<S: RecordStore> RecordStore for FlakyRecordStore<S> {
    async fn count(&self, target: &Target) -> StoreResult<i64> {
        self.inner.count(target).await
    }

    async fn page(&self, target: &Target, offset: i64, limit: i64) -> StoreResult<Vec<Record>> {
        self.inner.page(target, offset, limit).await
    }

    async fn save(&self, target: &Target, record: &Record) -> StoreResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(MigrationError::Persistence("database is locked".into()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(target, record).await
    }
}
