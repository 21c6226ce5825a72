//! Image and gallery uploads.
//!
//! Files are validated synchronously before any upload is attempted.
//! Gallery batches upload one file at a time and stop at the first
//! failure, keeping whatever already made it.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{info, instrument, warn};

use crate::api::ApiError;
use crate::error::ValidationError;
use crate::model::{ContainerRef, GalleryData, GalleryImage, ImageData};

pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// A file picked by the author, already read into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("invalid file name"))?
            .to_string();
        let bytes = fs::read(path)
            .await
            .with_context(|| format!("failed to read file: {}", path.display()))?;
        Ok(Self {
            mime_type: content_type_for(path).to_string(),
            name,
            bytes,
        })
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase())
    {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "webp" => "image/webp",
        Some(ext) if ext == "svg" => "image/svg+xml",
        Some(ext) if ext == "pdf" => "application/pdf",
        Some(ext) if ext == "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Transport for image uploads; returns the stored file's URL.
#[async_trait]
pub trait ImageUploader: Send + Sync {
    async fn upload_image(&self, file: &UploadFile, container: Option<ContainerRef>) -> Result<String, ApiError>;
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("upload of {file} failed: {source}")]
    Transport {
        file: String,
        #[source]
        source: ApiError,
    },
}

/// Must be an image MIME type and no larger than `max_bytes`.
pub fn validate_image(file: &UploadFile, max_bytes: u64) -> Result<(), ValidationError> {
    if !file.mime_type.starts_with("image/") {
        return Err(ValidationError::NotAnImage {
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
        });
    }
    if file.size() > max_bytes {
        return Err(ValidationError::FileTooLarge {
            name: file.name.clone(),
            size: file.size(),
            limit: max_bytes,
        });
    }
    Ok(())
}

/// Upload one image into an image block's payload. Alt and caption are kept.
#[instrument(skip_all, fields(file = %file.name))]
pub async fn upload_image(
    current: &ImageData,
    file: &UploadFile,
    uploader: &dyn ImageUploader,
    container: Option<ContainerRef>,
    max_bytes: u64,
) -> Result<ImageData, UploadError> {
    validate_image(file, max_bytes)?;
    let url = uploader
        .upload_image(file, container)
        .await
        .map_err(|source| UploadError::Transport {
            file: file.name.clone(),
            source,
        })?;
    Ok(ImageData {
        url: Some(url),
        filename: file.name.clone(),
        ..current.clone()
    })
}

/// Result of a gallery batch. `data` always reflects every image that
/// was uploaded, even when `error` is set.
#[derive(Debug)]
pub struct GalleryUpload {
    pub data: GalleryData,
    pub uploaded: usize,
    pub error: Option<UploadError>,
}

/// Validate every file, then upload them in order, appending each to the
/// gallery as it completes. The first failing upload ends the batch.
#[instrument(skip_all, fields(files = files.len()))]
pub async fn upload_gallery(
    current: &GalleryData,
    files: &[UploadFile],
    uploader: &dyn ImageUploader,
    container: Option<ContainerRef>,
    max_bytes: u64,
) -> GalleryUpload {
    let mut data = current.clone();

    if let Some(err) = files.iter().find_map(|f| validate_image(f, max_bytes).err()) {
        return GalleryUpload {
            data,
            uploaded: 0,
            error: Some(err.into()),
        };
    }

    let mut uploaded = 0;
    for file in files {
        match uploader.upload_image(file, container).await {
            Ok(url) => {
                data.images.push(GalleryImage {
                    url,
                    caption: String::new(),
                    alt: String::new(),
                });
                uploaded += 1;
            }
            Err(source) => {
                warn!(file = %file.name, %source, uploaded, "gallery upload stopped");
                return GalleryUpload {
                    data,
                    uploaded,
                    error: Some(UploadError::Transport {
                        file: file.name.clone(),
                        source,
                    }),
                };
            }
        }
    }

    info!(uploaded, "gallery upload finished");
    GalleryUpload {
        data,
        uploaded,
        error: None,
    }
}
