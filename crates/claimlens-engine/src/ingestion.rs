use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::CONTENT_TYPE;

use crate::error::AnalysisError;

pub const REMOTE_DISPLAY_NAME: &str = "Image from URL";

/// Where the bytes of an [`ImageRecord`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOrigin {
    Local {
        raw_bytes: Vec<u8>,
        mime_type: String,
    },
    Remote {
        source_url: String,
        raw_bytes: Vec<u8>,
        mime_type: String,
    },
}

impl ImageOrigin {
    pub fn raw_bytes(&self) -> &[u8] {
        match self {
            ImageOrigin::Local { raw_bytes, .. } | ImageOrigin::Remote { raw_bytes, .. } => {
                raw_bytes
            }
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            ImageOrigin::Local { mime_type, .. } | ImageOrigin::Remote { mime_type, .. } => {
                mime_type
            }
        }
    }

    pub fn source_url(&self) -> Option<&str> {
        match self {
            ImageOrigin::Remote { source_url, .. } => Some(source_url),
            ImageOrigin::Local { .. } => None,
        }
    }
}

/// A user-supplied photo, fully read into memory.
///
/// Records are immutable; pick a new image by building a new record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    origin: ImageOrigin,
    preview_uri: String,
    display_name: String,
    byte_size: u64,
}

impl ImageRecord {
    fn build(origin: ImageOrigin, display_name: String) -> Self {
        let preview_uri = data_uri(origin.mime_type(), origin.raw_bytes());
        let byte_size = origin.raw_bytes().len() as u64;
        Self {
            origin,
            preview_uri,
            display_name,
            byte_size,
        }
    }

    pub fn origin(&self) -> &ImageOrigin {
        &self.origin
    }

    /// Base64 `data:` URI, renderable and sendable as-is.
    pub fn preview_uri(&self) -> &str {
        &self.preview_uri
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }
}

pub fn ingest_local_file(
    bytes: Vec<u8>,
    mime_type: &str,
    name: &str,
) -> Result<ImageRecord, AnalysisError> {
    let mime_type = require_image_media_type(mime_type)?;
    let record = ImageRecord::build(
        ImageOrigin::Local {
            raw_bytes: bytes,
            mime_type,
        },
        name.to_string(),
    );
    log::info!(
        "IMAGE_INGESTED source=local name={} bytes={}",
        record.display_name(),
        record.byte_size()
    );
    Ok(record)
}

/// Reads `path` and guesses its media type from the extension.
pub async fn ingest_local_path(path: &Path) -> Result<ImageRecord, AnalysisError> {
    let mime_type = mime_for_path(path);
    require_image_media_type(mime_type)?;
    let bytes = tokio::fs::read(path).await.map_err(|err| {
        AnalysisError::Unclassified(format!("failed reading file {}: {err}", path.display()))
    })?;
    let name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("image");
    ingest_local_file(bytes, mime_type, name)
}

pub async fn ingest_remote_url(
    http: &reqwest::Client,
    url: &str,
) -> Result<ImageRecord, AnalysisError> {
    let fetch_failed = |reason: String| AnalysisError::FetchFailed {
        url: url.to_string(),
        reason,
    };

    let response = http
        .get(url)
        .send()
        .await
        .map_err(|err| fetch_failed(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(fetch_failed(format!("status {}", status.as_u16())));
    }

    let declared = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let mime_type = require_image_media_type(&declared)?;
    let body = response
        .bytes()
        .await
        .map_err(|err| fetch_failed(err.to_string()))?;

    let record = ImageRecord::build(
        ImageOrigin::Remote {
            source_url: url.to_string(),
            raw_bytes: body.to_vec(),
            mime_type,
        },
        REMOTE_DISPLAY_NAME.to_string(),
    );
    log::info!(
        "IMAGE_INGESTED source=remote url={} bytes={}",
        url,
        record.byte_size()
    );
    Ok(record)
}

/// `1536` -> `1.5 KB`. Base 1024, at most two decimals.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

fn require_image_media_type(raw: &str) -> Result<String, AnalysisError> {
    let normalized = raw
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if !normalized.starts_with("image/") {
        log::warn!("IMAGE_REJECTED media_type={raw:?}");
        return Err(AnalysisError::InvalidMediaType(raw.to_string()));
    }
    Ok(normalized)
}

fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" | "heif" => "image/heic",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
