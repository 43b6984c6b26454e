//! Remote image URL detection.
//!
//! Pure string inspection, no network access:
//! 1. Values that already point into the managed media store are local references
//! 2. A candidate must end (path component only) in an allow-listed image extension
//! 3. Anything without a parseable extension is not a candidate

use url::Url;

/// Extensions that mark a value as a possible image link.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "webp", "bmp", "svg"];

pub const DEFAULT_LOCAL_MARKER: &str = "/uploads/";

/// Classification of a scalar field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlKind {
    Local,       // Already inside the media store
    RemoteImage, // Looks like an external image, migrate it
    Other,       // Plain text, non-image links, empty values
}

#[derive(Debug, Clone)]
pub struct UrlClassifier {
    local_marker: String,
}

impl Default for UrlClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_MARKER)
    }
}

impl UrlClassifier {
    pub fn new(local_marker: impl Into<String>) -> Self {
        Self {
            local_marker: local_marker.into(),
        }
    }

    pub fn local_marker(&self) -> &str {
        &self.local_marker
    }

    pub fn is_local_reference(&self, value: &str) -> bool {
        !self.local_marker.is_empty() && value.contains(&self.local_marker)
    }

    pub fn is_remote_image_candidate(&self, value: &str) -> bool {
        if value.is_empty() || self.is_local_reference(value) {
            return false;
        }
        image_extension(value).is_some()
    }

    pub fn classify(&self, value: &str) -> UrlKind {
        if self.is_local_reference(value) {
            UrlKind::Local
        } else if self.is_remote_image_candidate(value) {
            UrlKind::RemoteImage
        } else {
            UrlKind::Other
        }
    }
}

/// Lower-cased, allow-listed extension of the value's path component.
///
/// ```
/// use entry_image_migrator::migration::classifier::image_extension;
///
/// assert_eq!(image_extension("https://cdn.example.com/a/Cat.JPG?w=200"), Some("jpg".into()));
/// assert_eq!(image_extension("https://cdn.example.com/page.html"), None);
/// ```
pub fn image_extension(value: &str) -> Option<String> {
    let ext = path_extension(value)?;
    IMAGE_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

fn path_extension(value: &str) -> Option<String> {
    let path = path_component(value);
    let segment = path.rsplit('/').next()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn path_component(value: &str) -> String {
    if let Ok(parsed) = Url::parse(value) {
        if parsed.has_host() {
            return parsed.path().to_string();
        }
    }
    let end = value.find(['?', '#']).unwrap_or(value.len());
    value[..end].to_string()
}

/// Last path segment of a URL, percent-decoded, used as the stored filename.
pub fn file_name_from_url(value: &str) -> Option<String> {
    let path = path_component(value);
    let raw = path.rsplit('/').next()?.trim();
    if raw.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(raw)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    let cleaned: String = decoded
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '-' || c == '.').to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}
