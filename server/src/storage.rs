//! Object storage gateway.
//!
//! Thin adapter over the remote object store: single-object PUT/DELETE,
//! presigned URLs and the raw multipart primitives. It holds no upload
//! state of its own; multipart bookkeeping lives in the backend.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use bytes::Bytes;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::multipart::{MultipartStore, PartId};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{Attribute, Attributes, ObjectStore, ObjectStoreExt, PutOptions, PutPayload};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::sync::Arc;
use std::time::Duration;

use crate::config::S3Config;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no such upload: {0}")]
    NoSuchUpload(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid part: {0}")]
    InvalidPart(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("unsupported by storage backend: {0}")]
    Unsupported(String),
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        let message = err.to_string();
        match err {
            object_store::Error::NotFound { path, .. } => {
                if message.contains("NoSuchUpload") {
                    StorageError::NoSuchUpload(path)
                } else {
                    StorageError::NotFound(path)
                }
            }
            object_store::Error::NotSupported { .. }
            | object_store::Error::NotImplemented { .. } => StorageError::Unsupported(message),
            _ if message.contains("NoSuchUpload") => StorageError::NoSuchUpload(message),
            _ if message.contains("InvalidPart") || message.contains("InvalidPartOrder") => {
                StorageError::InvalidPart(message)
            }
            _ => StorageError::Backend(message),
        }
    }
}

/// Which bucket an object lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Videos; only reachable through signed URLs.
    Private,
    /// Thumbnails; reachable through the public base URL.
    Public,
}

#[async_trait]
pub trait ObjectGateway: Send + Sync + 'static {
    async fn put_object(
        &self,
        visibility: Visibility,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Succeeds when the object is already gone.
    async fn delete_object(&self, visibility: Visibility, key: &str) -> Result<(), StorageError>;

    async fn signed_get_url(&self, key: &str, expires_in: Duration) -> Result<String, StorageError>;

    /// The upload must send `content_type`, which is part of the signature.
    async fn signed_put_url(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError>;

    fn public_url(&self, key: &str) -> String;

    /// Starts a multipart transaction and returns its upload id. The
    /// assembled object carries `content_type`.
    async fn create_multipart(&self, key: &str, content_type: &str) -> Result<String, StorageError>;

    /// Uploads part `part_number` (1-based) and returns its ETag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, StorageError>;

    /// Finalizes the object from `etags`, which must be in part order
    /// starting at part 1. Returns the object location.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        etags: Vec<String>,
    ) -> Result<String, StorageError>;

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StorageError>;
}

/// Characters `encodeURIComponent` leaves alone.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, URI_COMPONENT).to_string()
}

pub fn public_url_for(base: Option<&str>, key: &str) -> String {
    match base {
        Some(base) if !base.is_empty() => {
            format!("{}/{}", base.trim_end_matches('/'), encode_key(key))
        }
        _ => format!("/r2/{}", encode_key(key)),
    }
}

// ============================================================================
// S3 gateway
// ============================================================================

pub struct S3Gateway {
    private: Arc<AmazonS3>,
    public: Arc<AmazonS3>,
    /// Requests that need headers object_store cannot attach: multipart
    /// creation and presigned PUTs with a content type.
    sdk: aws_sdk_s3::Client,
    endpoint: String,
    bucket: String,
    public_base_url: Option<String>,
}

fn client_for_bucket(s3: &S3Config, bucket: &str) -> Result<AmazonS3, StorageError> {
    AmazonS3Builder::new()
        .with_region(&s3.region)
        .with_endpoint(&s3.endpoint)
        .with_bucket_name(bucket)
        .with_access_key_id(&s3.access_key)
        .with_secret_access_key(&s3.secret_key)
        .with_allow_http(true)
        // Use path-style URLs (http://localhost:9000/bucket/key) instead of
        // virtual-hosted style (http://bucket.localhost:9000/key) for MinIO
        .with_virtual_hosted_style_request(false)
        .build()
        .map_err(StorageError::from)
}

fn sdk_client(s3: &S3Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(&s3.access_key, &s3.secret_key, None, None, "episodic-env");
    let config = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .endpoint_url(&s3.endpoint)
        .region(Region::new(s3.region.clone()))
        .credentials_provider(credentials)
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(config)
}

fn sdk_error(err: impl std::error::Error) -> StorageError {
    let message = DisplayErrorContext(&err).to_string();
    if message.contains("NoSuchUpload") {
        StorageError::NoSuchUpload(message)
    } else {
        StorageError::Backend(message)
    }
}

impl S3Gateway {
    pub fn new(s3: &S3Config) -> Result<Self, StorageError> {
        Ok(S3Gateway {
            private: Arc::new(client_for_bucket(s3, &s3.bucket)?),
            public: Arc::new(client_for_bucket(s3, &s3.public_bucket)?),
            sdk: sdk_client(s3),
            endpoint: s3.endpoint.trim_end_matches('/').to_string(),
            bucket: s3.bucket.clone(),
            public_base_url: s3.public_base_url.clone(),
        })
    }

    fn client(&self, visibility: Visibility) -> &AmazonS3 {
        match visibility {
            Visibility::Private => &self.private,
            Visibility::Public => &self.public,
        }
    }
}

#[async_trait]
impl ObjectGateway for S3Gateway {
    async fn put_object(
        &self,
        visibility: Visibility,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };
        self.client(visibility)
            .put_opts(&Path::from(key), PutPayload::from(data), opts)
            .await?;
        Ok(())
    }

    async fn delete_object(&self, visibility: Visibility, key: &str) -> Result<(), StorageError> {
        match self.client(visibility).delete(&Path::from(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn signed_get_url(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        let url = self
            .private
            .signed_url(http::Method::GET, &Path::from(key), expires_in)
            .await?;
        Ok(url.to_string())
    }

    async fn signed_put_url(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(expires_in).map_err(sdk_error)?;
        let request = self
            .sdk
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(sdk_error)?;
        Ok(request.uri().to_string())
    }

    fn public_url(&self, key: &str) -> String {
        public_url_for(self.public_base_url.as_deref(), key)
    }

    async fn create_multipart(&self, key: &str, content_type: &str) -> Result<String, StorageError> {
        log::debug!("Creating multipart upload for {} ({})", key, content_type);
        let output = self
            .sdk
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(sdk_error)?;
        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Backend(format!("no upload id returned for {}", key)))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, StorageError> {
        let part_idx = part_number
            .checked_sub(1)
            .ok_or_else(|| StorageError::InvalidPart("part numbers start at 1".to_string()))?;
        let upload_id = upload_id.to_string();
        let part = self
            .private
            .put_part(
                &Path::from(key),
                &upload_id,
                part_idx as usize,
                PutPayload::from(data),
            )
            .await?;
        Ok(part.content_id)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        etags: Vec<String>,
    ) -> Result<String, StorageError> {
        let parts = etags
            .into_iter()
            .map(|content_id| PartId { content_id })
            .collect();
        let upload_id = upload_id.to_string();
        self.private
            .complete_multipart(&Path::from(key), &upload_id, parts)
            .await?;
        Ok(format!("{}/{}/{}", self.endpoint, self.bucket, key))
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StorageError> {
        let upload_id = upload_id.to_string();
        self.private
            .abort_multipart(&Path::from(key), &upload_id)
            .await?;
        Ok(())
    }
}

// ============================================================================
// In-memory gateway
// ============================================================================

#[cfg(test)]
pub use memory::MemoryGateway;

#[cfg(test)]
mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct PendingUpload {
        key: String,
        content_type: String,
        parts: HashMap<u32, (String, Bytes)>,
    }

    #[derive(Debug, Default)]
    struct MemoryState {
        objects: HashMap<(Visibility, String), (Bytes, String)>,
        uploads: HashMap<String, PendingUpload>,
        next_id: u64,
        part_calls: Vec<u32>,
        abort_calls: usize,
    }

    /// In-process gateway mirroring the backend's multipart contract.
    ///
    /// Thread-safe via `Mutex`. Supports failure injection on part uploads
    /// for exercising retry and abort paths.
    #[derive(Debug, Default)]
    pub struct MemoryGateway {
        state: Mutex<MemoryState>,
        /// Number of upcoming part uploads that fail with a transient error.
        fail_next_parts: AtomicU32,
    }

    impl MemoryGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_next_parts(&self, count: u32) {
            self.fail_next_parts.store(count, Ordering::SeqCst);
        }

        fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StorageError> {
            self.state
                .lock()
                .map_err(|_| StorageError::Backend("lock poisoned".to_string()))
        }

        pub fn object(&self, visibility: Visibility, key: &str) -> Option<Bytes> {
            self.lock()
                .ok()?
                .objects
                .get(&(visibility, key.to_string()))
                .map(|(data, _)| data.clone())
        }

        pub fn content_type(&self, visibility: Visibility, key: &str) -> Option<String> {
            self.lock()
                .ok()?
                .objects
                .get(&(visibility, key.to_string()))
                .map(|(_, content_type)| content_type.clone())
        }

        pub fn pending_uploads(&self) -> usize {
            self.lock().map(|s| s.uploads.len()).unwrap_or_default()
        }

        /// Part numbers of every attempted part upload, in call order.
        pub fn part_calls(&self) -> Vec<u32> {
            self.lock().map(|s| s.part_calls.clone()).unwrap_or_default()
        }

        pub fn abort_calls(&self) -> usize {
            self.lock().map(|s| s.abort_calls).unwrap_or_default()
        }
    }

    #[async_trait]
    impl ObjectGateway for MemoryGateway {
        async fn put_object(
            &self,
            visibility: Visibility,
            key: &str,
            data: Bytes,
            content_type: &str,
        ) -> Result<(), StorageError> {
            self.lock()?
                .objects
                .insert((visibility, key.to_string()), (data, content_type.to_string()));
            Ok(())
        }

        async fn delete_object(&self, visibility: Visibility, key: &str) -> Result<(), StorageError> {
            self.lock()?.objects.remove(&(visibility, key.to_string()));
            Ok(())
        }

        async fn signed_get_url(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
            Ok(format!(
                "memory://private/{}?method=GET&expires={}",
                encode_key(key),
                expires_in.as_secs()
            ))
        }

        async fn signed_put_url(
            &self,
            key: &str,
            content_type: &str,
            expires_in: Duration,
        ) -> Result<String, StorageError> {
            Ok(format!(
                "memory://private/{}?method=PUT&content-type={}&expires={}",
                encode_key(key),
                encode_key(content_type),
                expires_in.as_secs()
            ))
        }

        fn public_url(&self, key: &str) -> String {
            public_url_for(None, key)
        }

        async fn create_multipart(&self, key: &str, content_type: &str) -> Result<String, StorageError> {
            let mut state = self.lock()?;
            state.next_id += 1;
            let id = format!("upload-{}", state.next_id);
            state.uploads.insert(
                id.clone(),
                PendingUpload {
                    key: key.to_string(),
                    content_type: content_type.to_string(),
                    parts: HashMap::new(),
                },
            );
            Ok(id)
        }

        async fn upload_part(
            &self,
            key: &str,
            upload_id: &str,
            part_number: u32,
            data: Bytes,
        ) -> Result<String, StorageError> {
            let mut state = self.lock()?;
            state.part_calls.push(part_number);

            let injected = self
                .fail_next_parts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(StorageError::Backend(format!(
                    "injected failure on part {}",
                    part_number
                )));
            }

            let upload = state
                .uploads
                .get_mut(upload_id)
                .filter(|u| u.key == key)
                .ok_or_else(|| StorageError::NoSuchUpload(upload_id.to_string()))?;
            // Same bytes for the same part number yield the same token.
            let etag = format!("\"{}-{}-{}\"", upload_id, part_number, data.len());
            upload.parts.insert(part_number, (etag.clone(), data));
            Ok(etag)
        }

        async fn complete_multipart(
            &self,
            key: &str,
            upload_id: &str,
            etags: Vec<String>,
        ) -> Result<String, StorageError> {
            let mut state = self.lock()?;
            let upload = state
                .uploads
                .get(upload_id)
                .filter(|u| u.key == key)
                .ok_or_else(|| StorageError::NoSuchUpload(upload_id.to_string()))?;

            let mut body = Vec::new();
            for (idx, etag) in etags.iter().enumerate() {
                let part_number = idx as u32 + 1;
                match upload.parts.get(&part_number) {
                    Some((stored, data)) if stored == etag => body.extend_from_slice(data),
                    _ => {
                        return Err(StorageError::InvalidPart(format!(
                            "part {} does not match an uploaded part",
                            part_number
                        )))
                    }
                }
            }

            let content_type = upload.content_type.clone();
            state.uploads.remove(upload_id);
            state.objects.insert(
                (Visibility::Private, key.to_string()),
                (Bytes::from(body), content_type),
            );
            Ok(format!("memory://private/{}", key))
        }

        async fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<(), StorageError> {
            let mut state = self.lock()?;
            state.abort_calls += 1;
            match state.uploads.remove(upload_id) {
                Some(_) => Ok(()),
                None => Err(StorageError::NoSuchUpload(upload_id.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_key_matches_uri_component_encoding() {
        assert_eq!(
            encode_key("courses/thumbnails/1_a b.png"),
            "courses%2Fthumbnails%2F1_a%20b.png"
        );
        assert_eq!(encode_key("it's_(v2)!~*.mp4"), "it's_(v2)!~*.mp4");
        assert_eq!(encode_key("café&x=1"), "caf%C3%A9%26x%3D1");
    }

    #[test]
    fn test_public_url_prefers_base_url() {
        assert_eq!(
            public_url_for(Some("https://cdn.example.com/"), "a/b.png"),
            "https://cdn.example.com/a%2Fb.png"
        );
        assert_eq!(public_url_for(None, "a.png"), "/r2/a.png");
    }

    #[tokio::test]
    async fn test_memory_multipart_assembles_parts_in_order() {
        let gw = MemoryGateway::new();
        let id = gw.create_multipart("v.mp4", "video/mp4").await.unwrap();
        let e2 = gw
            .upload_part("v.mp4", &id, 2, Bytes::from_static(b"world"))
            .await
            .unwrap();
        let e1 = gw
            .upload_part("v.mp4", &id, 1, Bytes::from_static(b"hello "))
            .await
            .unwrap();

        gw.complete_multipart("v.mp4", &id, vec![e1, e2]).await.unwrap();

        assert_eq!(
            gw.object(Visibility::Private, "v.mp4").unwrap(),
            Bytes::from_static(b"hello world")
        );
        assert_eq!(
            gw.content_type(Visibility::Private, "v.mp4").as_deref(),
            Some("video/mp4")
        );
        assert_eq!(gw.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_memory_abort_unknown_upload() {
        let gw = MemoryGateway::new();
        let result = gw.abort_multipart("v.mp4", "nope").await;
        assert!(matches!(result, Err(StorageError::NoSuchUpload(_))));
    }

    #[tokio::test]
    async fn test_memory_put_and_delete() {
        let gw = MemoryGateway::new();
        gw.put_object(Visibility::Public, "t.png", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();
        assert!(gw.object(Visibility::Public, "t.png").is_some());
        assert!(gw.object(Visibility::Private, "t.png").is_none());

        gw.delete_object(Visibility::Public, "t.png").await.unwrap();
        gw.delete_object(Visibility::Public, "t.png").await.unwrap();
        assert!(gw.object(Visibility::Public, "t.png").is_none());
    }
}
