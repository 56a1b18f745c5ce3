//! Multipart upload coordinator.
//!
//! A stateless protocol layer between the admin upload client and the
//! storage backend's own multipart bookkeeping. Every call carries the
//! session identity `(key, upload_id)`; nothing is kept in process between
//! requests, so the backend stays the single source of truth for which
//! parts exist.

use bytes::Bytes;
use chrono::Utc;
use shared::CompletedPart;
use std::sync::Arc;

use crate::retry::{with_retry, RetryConfig, RetryError};
use crate::storage::{ObjectGateway, StorageError};

/// Prefix of every video key produced by the upload paths.
pub const VIDEO_PREFIX: &str = "episodes/videos";

/// Highest part number accepted by S3-compatible stores.
pub const MAX_PART_NUMBER: u32 = 10_000;

pub(crate) const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("object storage is not configured")]
    BackendUnavailable,
    #[error("upload of part {part_number} failed: {source}")]
    PartUploadFailed {
        part_number: u32,
        source: StorageError,
    },
    #[error("incomplete upload: {0}")]
    IncompleteUpload(String),
    #[error("no such upload: {0}")]
    NoSuchUpload(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Builds `{prefix}/{unix micros}_{sanitized filename}`.
pub fn object_key(prefix: &str, filename: &str) -> Result<String, UploadError> {
    let filename = filename.trim();
    if filename.is_empty() {
        return Err(UploadError::InvalidInput("filename required".to_string()));
    }
    Ok(format!(
        "{}/{}_{}",
        prefix,
        Utc::now().timestamp_micros(),
        sanitize_filename(filename)
    ))
}

/// Checks that `parts` covers exactly `1..=N` and returns the ETags in
/// part order.
///
/// The backend pairs tokens with part numbers by position, so a gap or a
/// duplicate would silently finalize the wrong bytes.
pub fn ordered_etags(parts: &[CompletedPart]) -> Result<Vec<String>, UploadError> {
    if parts.is_empty() {
        return Err(UploadError::IncompleteUpload("no parts supplied".to_string()));
    }
    let mut sorted: Vec<&CompletedPart> = parts.iter().collect();
    sorted.sort_by_key(|p| p.part_number);

    let mut etags = Vec::with_capacity(sorted.len());
    for (idx, part) in sorted.iter().enumerate() {
        let expected = idx as u32 + 1;
        if part.part_number != expected {
            return Err(UploadError::IncompleteUpload(format!(
                "expected part {} but found part {}",
                expected, part.part_number
            )));
        }
        if part.e_tag.is_empty() {
            return Err(UploadError::IncompleteUpload(format!(
                "part {} has no ETag",
                part.part_number
            )));
        }
        etags.push(part.e_tag.clone());
    }
    Ok(etags)
}

fn require_session(key: &str, upload_id: &str) -> Result<(), UploadError> {
    if key.is_empty() || upload_id.is_empty() {
        return Err(UploadError::InvalidInput(
            "key and uploadId are required".to_string(),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct Coordinator {
    gateway: Option<Arc<dyn ObjectGateway>>,
    retry: RetryConfig,
}

impl Coordinator {
    pub fn new(gateway: Option<Arc<dyn ObjectGateway>>, retry: RetryConfig) -> Self {
        Coordinator { gateway, retry }
    }

    fn gateway(&self) -> Result<&Arc<dyn ObjectGateway>, UploadError> {
        self.gateway.as_ref().ok_or(UploadError::BackendUnavailable)
    }

    /// Opens a multipart transaction for a new video object.
    pub async fn start(
        &self,
        filename: &str,
        content_type: Option<&str>,
    ) -> Result<(String, String), UploadError> {
        let gateway = self.gateway()?;
        let key = object_key(VIDEO_PREFIX, filename)?;
        let content_type = content_type
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        let upload_id = gateway.create_multipart(&key, content_type).await?;
        log::info!("Started multipart upload {} for {}", upload_id, key);
        Ok((key, upload_id))
    }

    /// Forwards one part to the backend, retrying transient failures.
    ///
    /// Re-sending the same part number with the same bytes is accepted by
    /// the backend, which makes the retry safe.
    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, UploadError> {
        let gateway = self.gateway()?;
        require_session(key, upload_id)?;
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(UploadError::InvalidInput(format!(
                "partNumber must be between 1 and {}",
                MAX_PART_NUMBER
            )));
        }
        if data.is_empty() {
            return Err(UploadError::InvalidInput("part is empty".to_string()));
        }

        let result = with_retry(
            || {
                let data = data.clone();
                async move {
                    gateway
                        .upload_part(key, upload_id, part_number, data)
                        .await
                        .map_err(|e| match e {
                            StorageError::Backend(_) => RetryError::Retryable(e),
                            other => RetryError::NonRetryable(other),
                        })
                }
            },
            &self.retry,
        )
        .await;

        match result {
            Ok(etag) => {
                log::debug!("Uploaded part {} of {}", part_number, key);
                Ok(etag)
            }
            Err(RetryError::NonRetryable(StorageError::NoSuchUpload(id))) => {
                Err(UploadError::NoSuchUpload(id))
            }
            Err(err) => Err(UploadError::PartUploadFailed {
                part_number,
                source: err.into_inner(),
            }),
        }
    }

    /// Assembles the final object from the supplied part tokens.
    pub async fn complete(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String, UploadError> {
        let gateway = self.gateway()?;
        require_session(key, upload_id)?;
        let etags = ordered_etags(parts)?;
        let count = etags.len();

        let location = gateway
            .complete_multipart(key, upload_id, etags)
            .await
            .map_err(|e| match e {
                StorageError::NoSuchUpload(id) => UploadError::NoSuchUpload(id),
                StorageError::InvalidPart(msg) => UploadError::IncompleteUpload(msg),
                other => UploadError::Storage(other),
            })?;

        log::info!("Completed multipart upload of {} ({} parts)", key, count);
        Ok(location)
    }

    /// Discards the transaction and its parts. A transaction that is
    /// already gone counts as aborted.
    pub async fn abort(&self, key: &str, upload_id: &str) -> Result<(), UploadError> {
        let gateway = self.gateway()?;
        require_session(key, upload_id)?;

        match gateway.abort_multipart(key, upload_id).await {
            Ok(()) => {
                log::warn!("Aborted multipart upload: {}", key);
                Ok(())
            }
            Err(StorageError::NoSuchUpload(_)) => {
                log::warn!("Upload already gone: {} ({})", key, upload_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryGateway, Visibility};

    fn coordinator(gateway: Arc<MemoryGateway>, attempts: u32) -> Coordinator {
        Coordinator::new(Some(gateway), RetryConfig::immediate(attempts))
    }

    fn part(part_number: u32, e_tag: &str) -> CompletedPart {
        CompletedPart {
            e_tag: e_tag.to_string(),
            part_number,
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My Video (final).mp4"), "My_Video__final_.mp4");
        assert_eq!(sanitize_filename("ok-name_1.mov"), "ok-name_1.mov");
        assert_eq!(sanitize_filename("épisode.mp4"), "_pisode.mp4");
    }

    #[test]
    fn test_object_key_layout() {
        let key = object_key(VIDEO_PREFIX, "intro 1.mp4").unwrap();
        let rest = key.strip_prefix("episodes/videos/").unwrap();
        let (stamp, name) = rest.split_once('_').unwrap();
        assert!(stamp.parse::<i64>().is_ok());
        assert_eq!(name, "intro_1.mp4");
    }

    #[test]
    fn test_ordered_etags_sorts_parts() {
        let etags = ordered_etags(&[part(2, "b"), part(1, "a"), part(3, "c")]).unwrap();
        assert_eq!(etags, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ordered_etags_rejects_gaps_and_duplicates() {
        assert!(matches!(
            ordered_etags(&[part(1, "a"), part(3, "c")]),
            Err(UploadError::IncompleteUpload(_))
        ));
        assert!(matches!(
            ordered_etags(&[part(1, "a"), part(1, "a2")]),
            Err(UploadError::IncompleteUpload(_))
        ));
        assert!(matches!(
            ordered_etags(&[part(2, "b")]),
            Err(UploadError::IncompleteUpload(_))
        ));
        assert!(matches!(ordered_etags(&[]), Err(UploadError::IncompleteUpload(_))));
    }

    #[tokio::test]
    async fn test_start_requires_backend() {
        let coordinator = Coordinator::new(None, RetryConfig::default());
        let result = coordinator.start("a.mp4", Some("video/mp4")).await;
        assert!(matches!(result, Err(UploadError::BackendUnavailable)));
    }

    #[tokio::test]
    async fn test_start_rejects_empty_filename() {
        let coordinator = coordinator(Arc::new(MemoryGateway::new()), 1);
        let result = coordinator.start("  ", None).await;
        assert!(matches!(result, Err(UploadError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_full_upload_materializes_object() {
        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = coordinator(gateway.clone(), 1);

        let (key, upload_id) = coordinator.start("clip.mp4", Some("video/mp4")).await.unwrap();
        let mut parts = Vec::new();
        for (n, chunk) in [&b"aaa"[..], b"bbb", b"c"].iter().enumerate() {
            let part_number = n as u32 + 1;
            let e_tag = coordinator
                .upload_part(&key, &upload_id, part_number, Bytes::copy_from_slice(chunk))
                .await
                .unwrap();
            parts.push(CompletedPart { e_tag, part_number });
        }

        let location = coordinator.complete(&key, &upload_id, &parts).await.unwrap();
        assert!(location.ends_with(&key));
        assert_eq!(
            gateway.object(Visibility::Private, &key).unwrap(),
            Bytes::from_static(b"aaabbbc")
        );
        assert_eq!(
            gateway.content_type(Visibility::Private, &key).as_deref(),
            Some("video/mp4")
        );
    }

    #[tokio::test]
    async fn test_missing_content_type_defaults_to_octet_stream() {
        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = coordinator(gateway.clone(), 1);

        let (key, upload_id) = coordinator.start("clip.mp4", Some("")).await.unwrap();
        let e_tag = coordinator
            .upload_part(&key, &upload_id, 1, Bytes::from_static(b"v"))
            .await
            .unwrap();
        coordinator
            .complete(&key, &upload_id, &[CompletedPart { e_tag, part_number: 1 }])
            .await
            .unwrap();

        assert_eq!(
            gateway.content_type(Visibility::Private, &key).as_deref(),
            Some(DEFAULT_CONTENT_TYPE)
        );
    }

    #[tokio::test]
    async fn test_part_reupload_is_idempotent() {
        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = coordinator(gateway.clone(), 1);
        let (key, upload_id) = coordinator.start("clip.mp4", None).await.unwrap();

        let first = coordinator
            .upload_part(&key, &upload_id, 1, Bytes::from_static(b"xyz"))
            .await
            .unwrap();
        let second = coordinator
            .upload_part(&key, &upload_id, 1, Bytes::from_static(b"xyz"))
            .await
            .unwrap();
        assert_eq!(first, second);

        coordinator
            .complete(&key, &upload_id, &[part(1, &second)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transient_part_failure_is_retried() {
        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = coordinator(gateway.clone(), 3);
        let (key, upload_id) = coordinator.start("clip.mp4", None).await.unwrap();

        gateway.fail_next_parts(2);
        let etag = coordinator
            .upload_part(&key, &upload_id, 1, Bytes::from_static(b"data"))
            .await;
        assert!(etag.is_ok());
        assert_eq!(gateway.part_calls(), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn test_part_failure_after_budget_is_surfaced() {
        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = coordinator(gateway.clone(), 2);
        let (key, upload_id) = coordinator.start("clip.mp4", None).await.unwrap();

        gateway.fail_next_parts(5);
        let result = coordinator
            .upload_part(&key, &upload_id, 2, Bytes::from_static(b"data"))
            .await;
        assert!(matches!(
            result,
            Err(UploadError::PartUploadFailed { part_number: 2, .. })
        ));
        assert_eq!(gateway.part_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_part_for_unknown_upload() {
        let coordinator = coordinator(Arc::new(MemoryGateway::new()), 3);
        let result = coordinator
            .upload_part("episodes/videos/x", "missing", 1, Bytes::from_static(b"d"))
            .await;
        assert!(matches!(result, Err(UploadError::NoSuchUpload(_))));
    }

    #[tokio::test]
    async fn test_part_number_bounds() {
        let coordinator = coordinator(Arc::new(MemoryGateway::new()), 1);
        for n in [0, MAX_PART_NUMBER + 1] {
            let result = coordinator
                .upload_part("k", "u", n, Bytes::from_static(b"d"))
                .await;
            assert!(matches!(result, Err(UploadError::InvalidInput(_))));
        }
    }

    #[tokio::test]
    async fn test_complete_with_missing_part_fails() {
        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = coordinator(gateway.clone(), 1);
        let (key, upload_id) = coordinator.start("clip.mp4", None).await.unwrap();

        let mut parts = Vec::new();
        for n in 1..=3u32 {
            let e_tag = coordinator
                .upload_part(&key, &upload_id, n, Bytes::from_static(b"chunk"))
                .await
                .unwrap();
            parts.push(part(n, &e_tag));
        }
        parts.remove(1);

        let result = coordinator.complete(&key, &upload_id, &parts).await;
        assert!(matches!(result, Err(UploadError::IncompleteUpload(_))));
        assert_eq!(gateway.pending_uploads(), 1);
    }

    #[tokio::test]
    async fn test_complete_with_mismatched_token_fails() {
        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = coordinator(gateway.clone(), 1);
        let (key, upload_id) = coordinator.start("clip.mp4", None).await.unwrap();
        coordinator
            .upload_part(&key, &upload_id, 1, Bytes::from_static(b"chunk"))
            .await
            .unwrap();

        let result = coordinator
            .complete(&key, &upload_id, &[part(1, "\"forged\"")])
            .await;
        assert!(matches!(result, Err(UploadError::IncompleteUpload(_))));
    }

    #[tokio::test]
    async fn test_complete_after_abort_is_no_such_upload() {
        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = coordinator(gateway.clone(), 1);
        let (key, upload_id) = coordinator.start("clip.mp4", None).await.unwrap();
        let e_tag = coordinator
            .upload_part(&key, &upload_id, 1, Bytes::from_static(b"chunk"))
            .await
            .unwrap();
        coordinator.abort(&key, &upload_id).await.unwrap();

        let result = coordinator
            .complete(&key, &upload_id, &[part(1, &e_tag)])
            .await;
        assert!(matches!(result, Err(UploadError::NoSuchUpload(_))));
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = coordinator(gateway.clone(), 1);
        let (key, upload_id) = coordinator.start("clip.mp4", None).await.unwrap();

        coordinator.abort(&key, &upload_id).await.unwrap();
        coordinator.abort(&key, &upload_id).await.unwrap();
        coordinator.abort(&key, "never-existed").await.unwrap();

        assert_eq!(gateway.pending_uploads(), 0);
        assert_eq!(gateway.abort_calls(), 3);
    }

    #[tokio::test]
    async fn test_abort_after_complete_is_success() {
        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = coordinator(gateway.clone(), 1);
        let (key, upload_id) = coordinator.start("clip.mp4", None).await.unwrap();
        let e_tag = coordinator
            .upload_part(&key, &upload_id, 1, Bytes::from_static(b"chunk"))
            .await
            .unwrap();
        coordinator
            .complete(&key, &upload_id, &[part(1, &e_tag)])
            .await
            .unwrap();

        coordinator.abort(&key, &upload_id).await.unwrap();
        assert!(gateway.object(Visibility::Private, &key).is_some());
    }
}
