//! HTTP side of the upload protocol.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    AbortUploadRequest, AbortUploadResponse, CompleteUploadRequest, CompleteUploadResponse,
    CompletedPart, ErrorMessage, StartUploadRequest, StartUploadResponse, UploadPartResponse,
};

use crate::error::ApiError;

pub const START_PATH: &str = "/admin/multipart/start-video-upload";
pub const PART_PATH: &str = "/admin/multipart/upload-part";
pub const COMPLETE_PATH: &str = "/admin/multipart/complete-video-upload";
pub const ABORT_PATH: &str = "/admin/multipart/abort";

/// The four coordinator calls a driver needs.
#[async_trait]
pub trait UploadApi: Send + Sync {
    async fn start(&self, filename: &str, content_type: &str) -> Result<StartUploadResponse, ApiError>;

    /// Returns the part's ETag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, ApiError>;

    async fn complete(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<CompleteUploadResponse, ApiError>;

    async fn abort(&self, key: &str, upload_id: &str) -> Result<(), ApiError>;
}

/// Talks to the server with an admin session token.
#[derive(Clone)]
pub struct HttpUploadApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpUploadApi {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        HttpUploadApi {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let request = self.http.post(format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Single-request upload of a whole file as form field `field`.
    pub async fn upload_file<T: DeserializeOwned>(
        &self,
        path: &str,
        field: &str,
        filename: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<T, ApiError> {
        let len = data.len() as u64;
        let part = Part::stream_with_length(data, len)
            .file_name(filename.to_string())
            .mime_str(content_type)?;
        let form = Form::new().part(field.to_string(), part);
        decode(self.post(path).multipart(form).send().await?).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorMessage>(&body)
            .map(|e| e.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
        return Err(ApiError::Status { status, message });
    }
    serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl UploadApi for HttpUploadApi {
    async fn start(&self, filename: &str, content_type: &str) -> Result<StartUploadResponse, ApiError> {
        let request = StartUploadRequest {
            filename: filename.to_string(),
            content_type: Some(content_type.to_string()),
        };
        decode(self.post(START_PATH).json(&request).send().await?).await
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, ApiError> {
        let len = data.len() as u64;
        let form = Form::new()
            .text(shared::KEY_FIELD, key.to_string())
            .text(shared::UPLOAD_ID_FIELD, upload_id.to_string())
            .text(shared::PART_NUMBER_FIELD, part_number.to_string())
            .part(
                shared::PART_FIELD,
                Part::stream_with_length(data, len).file_name("blob"),
            );
        let response: UploadPartResponse =
            decode(self.post(PART_PATH).multipart(form).send().await?).await?;
        Ok(response.e_tag)
    }

    async fn complete(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<CompleteUploadResponse, ApiError> {
        let request = CompleteUploadRequest {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            parts,
        };
        decode(self.post(COMPLETE_PATH).json(&request).send().await?).await
    }

    async fn abort(&self, key: &str, upload_id: &str) -> Result<(), ApiError> {
        let request = AbortUploadRequest {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        };
        let _: AbortUploadResponse = decode(self.post(ABORT_PATH).json(&request).send().await?).await?;
        Ok(())
    }
}
