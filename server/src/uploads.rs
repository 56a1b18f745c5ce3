//! Single-request uploads: thumbnails, small videos and presigned direct
//! uploads.

use bytes::Bytes;
use shared::{PresignUploadResponse, PreviewUploadResponse, PublicUploadResponse};
use std::sync::Arc;
use std::time::Duration;

use crate::multipart::{object_key, UploadError, DEFAULT_CONTENT_TYPE, VIDEO_PREFIX};
use crate::retry::{with_retry, RetryConfig, RetryError};
use crate::storage::{ObjectGateway, StorageError, Visibility};

pub const PREVIEW_URL_TTL: Duration = Duration::from_secs(5 * 60);
pub const PRESIGNED_PUT_TTL: Duration = Duration::from_secs(30);

const PRESIGNED_PREFIX: &str = "videos";
const DEFAULT_THUMBNAIL_TYPE: &str = "image/png";
const DEFAULT_VIDEO_TYPE: &str = "video/mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailTarget {
    Course,
    Episode,
}

impl ThumbnailTarget {
    fn prefix(self) -> &'static str {
        match self {
            ThumbnailTarget::Course => "courses/thumbnails",
            ThumbnailTarget::Episode => "episodes/thumbnails",
        }
    }
}

/// A file received in a multipart form field.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

fn check_file(file: &UploadedFile, max_bytes: u64) -> Result<(), UploadError> {
    if file.data.is_empty() {
        return Err(UploadError::InvalidInput("file is empty".to_string()));
    }
    if file.data.len() as u64 > max_bytes {
        return Err(UploadError::InvalidInput(format!(
            "file exceeds the {} byte limit",
            max_bytes
        )));
    }
    Ok(())
}

fn require(gateway: Option<&Arc<dyn ObjectGateway>>) -> Result<&Arc<dyn ObjectGateway>, UploadError> {
    gateway.ok_or(UploadError::BackendUnavailable)
}

pub async fn upload_thumbnail(
    gateway: Option<&Arc<dyn ObjectGateway>>,
    target: ThumbnailTarget,
    file: UploadedFile,
    max_bytes: u64,
) -> Result<PublicUploadResponse, UploadError> {
    let gateway = require(gateway)?;
    check_file(&file, max_bytes)?;

    let key = object_key(target.prefix(), &file.filename)?;
    let content_type = file
        .content_type
        .as_deref()
        .filter(|ct| !ct.is_empty())
        .unwrap_or(DEFAULT_THUMBNAIL_TYPE);
    gateway
        .put_object(Visibility::Public, &key, file.data, content_type)
        .await?;

    log::info!("Uploaded thumbnail {}", key);
    Ok(PublicUploadResponse {
        public_url: gateway.public_url(&key),
        key,
    })
}

/// Stores a whole video in one PUT, retrying transient backend failures,
/// and returns a short-lived preview link.
pub async fn upload_video(
    gateway: Option<&Arc<dyn ObjectGateway>>,
    file: UploadedFile,
    max_bytes: u64,
    retry: &RetryConfig,
) -> Result<PreviewUploadResponse, UploadError> {
    let gateway = require(gateway)?;
    check_file(&file, max_bytes)?;

    let key = object_key(VIDEO_PREFIX, &file.filename)?;
    let content_type = file
        .content_type
        .as_deref()
        .filter(|ct| !ct.is_empty())
        .unwrap_or(DEFAULT_VIDEO_TYPE);

    with_retry(
        || {
            let data = file.data.clone();
            let key = key.as_str();
            async move {
                gateway
                    .put_object(Visibility::Private, key, data, content_type)
                    .await
                    .map_err(|e| match e {
                        StorageError::Backend(_) => RetryError::Retryable(e),
                        other => RetryError::NonRetryable(other),
                    })
            }
        },
        retry,
    )
    .await
    .map_err(|e| UploadError::Storage(e.into_inner()))?;

    let preview_url = gateway.signed_get_url(&key, PREVIEW_URL_TTL).await?;
    log::info!("Uploaded video {} ({} bytes)", key, file.data.len());
    Ok(PreviewUploadResponse { key, preview_url })
}

/// Issues a presigned PUT so the browser can upload straight to storage.
pub async fn presign_upload(
    gateway: Option<&Arc<dyn ObjectGateway>>,
    filename: &str,
    content_type: &str,
) -> Result<PresignUploadResponse, UploadError> {
    let gateway = require(gateway)?;
    let key = object_key(PRESIGNED_PREFIX, filename)?;
    let content_type = match content_type.trim() {
        "" => DEFAULT_CONTENT_TYPE,
        declared => declared,
    };
    let signed_put_url = gateway
        .signed_put_url(&key, content_type, PRESIGNED_PUT_TTL)
        .await?;
    log::debug!("Presigned PUT for {} ({})", key, content_type);
    Ok(PresignUploadResponse {
        key,
        signed_put_url,
    })
}
