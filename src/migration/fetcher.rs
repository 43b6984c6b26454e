//! Download + validate + hand off one remote image.

use async_trait::async_trait;
use bytes::Bytes;
use image::ImageFormat;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::classifier::{file_name_from_url, image_extension};
use super::error::FetchError;
use super::model::FetchResult;
use super::store::MediaStore;

/// Content types accepted after download. SVG passes URL classification but is
/// rejected here because it cannot be probed for dimensions.
pub const ALLOWED_MIME_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
];

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Never fails the caller: every problem is an `Err` inside the result.
    async fn fetch(&self, url: &str) -> FetchResult;
}

#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub timeout: Duration,
    pub max_bytes: u64,
    /// Directory for scratch downloads; system temp dir when `None`.
    pub temp_dir: Option<PathBuf>,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_bytes: 20 * 1024 * 1024,
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbedImage {
    pub format: ImageFormat,
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
}

pub struct HttpImageFetcher {
    client: Client,
    media: Arc<dyn MediaStore>,
    settings: FetcherSettings,
}

impl HttpImageFetcher {
    pub fn new(media: Arc<dyn MediaStore>, settings: FetcherSettings) -> Self {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("entry-image-migrator/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            media,
            settings,
        }
    }

    fn scratch_file(&self) -> Result<NamedTempFile, FetchError> {
        let res = match &self.settings.temp_dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        };
        res.map_err(|e| FetchError::Storage(format!("temp file: {e}")))
    }

    async fn download(&self, url: &str, scratch: &NamedTempFile) -> Result<u64, FetchError> {
        let mut resp = self.client.get(url).send().await?.error_for_status()?;

        if let Some(len) = resp.content_length() {
            if len > self.settings.max_bytes {
                return Err(FetchError::InvalidImage(format!(
                    "payload of {len} bytes exceeds limit of {}",
                    self.settings.max_bytes
                )));
            }
        }

        let handle = scratch
            .reopen()
            .map_err(|e| FetchError::Storage(format!("temp file: {e}")))?;
        let mut out = tokio::fs::File::from_std(handle);
        let mut written: u64 = 0;
        while let Some(chunk) = resp.chunk().await? {
            written += chunk.len() as u64;
            if written > self.settings.max_bytes {
                return Err(FetchError::InvalidImage(format!(
                    "payload exceeds limit of {} bytes",
                    self.settings.max_bytes
                )));
            }
            out.write_all(&chunk)
                .await
                .map_err(|e| FetchError::Storage(format!("temp write: {e}")))?;
        }
        out.flush()
            .await
            .map_err(|e| FetchError::Storage(format!("temp write: {e}")))?;
        Ok(written)
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> FetchResult {
        // Dropping `scratch` deletes the file, on every return path below.
        let scratch = self.scratch_file()?;
        let size = self.download(url, &scratch).await?;

        let path = scratch.path().to_path_buf();
        let hint = url.to_string();
        let probed = tokio::task::spawn_blocking(move || probe_image(&path, &hint))
            .await
            .map_err(|e| FetchError::Storage(format!("probe task: {e}")))??;
        debug!(
            url,
            size,
            mime = probed.mime,
            width = probed.width,
            height = probed.height,
            "image validated"
        );

        let bytes = tokio::fs::read(scratch.path())
            .await
            .map_err(|e| FetchError::Storage(format!("temp read: {e}")))?;
        let filename = stored_file_name(url, probed.format);
        let stored = self
            .media
            .store(Bytes::from(bytes), &filename, probed.mime)
            .await;
        drop(scratch);

        stored.map_err(|e| {
            warn!(url, error = %e, "media store rejected image");
            FetchError::from(e)
        })
    }
}

/// Resolve the content type and probe dimensions of a downloaded file.
///
/// The type comes from the file's magic bytes, falling back to the URL's extension
/// when the bytes are not recognised.
pub fn probe_image(path: &Path, url_hint: &str) -> Result<ProbedImage, FetchError> {
    let mut reader = image::io::Reader::open(path)
        .map_err(|e| FetchError::InvalidImage(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| FetchError::InvalidImage(e.to_string()))?;

    let format = match reader.format() {
        Some(f) => f,
        None => {
            let f = image_extension(url_hint)
                .and_then(ImageFormat::from_extension)
                .ok_or_else(|| FetchError::InvalidImage("unrecognised content type".into()))?;
            reader.set_format(f);
            f
        }
    };
    let mime = allowed_mime(format).ok_or_else(|| {
        FetchError::InvalidImage(format!("content type {format:?} is not allowed"))
    })?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| FetchError::InvalidImage(e.to_string()))?;
    Ok(ProbedImage {
        format,
        mime,
        width,
        height,
    })
}

pub fn allowed_mime(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Bmp => Some("image/bmp"),
        _ => None,
    }
}

/// File name for the local copy. The extension always follows the sniffed format, so a
/// PNG served as `cat.jpg` is stored as `cat.png`.
fn stored_file_name(url: &str, format: ImageFormat) -> String {
    let default_ext = format.extensions_str().first().copied().unwrap_or("img");
    let name = file_name_from_url(url).unwrap_or_else(|| "image".to_string());
    let stem = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            if ImageFormat::from_extension(ext) == Some(format) {
                return name;
            }
            stem
        }
        _ => name.as_str(),
    };
    format!("{stem}.{default_ext}")
}
