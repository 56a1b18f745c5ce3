//! Retried single-request uploads for thumbnails and short videos.

use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;

use crate::api::HttpUploadApi;
use crate::error::ApiError;
use crate::source::UploadSource;

pub const UPLOAD_ATTEMPTS: u32 = 3;
pub const UPLOAD_BACKOFF: Duration = Duration::from_millis(500);

/// Runs `op` up to `attempts` times, sleeping `backoff * attempt` after
/// each transient failure.
pub async fn retry_linear<T, F, Fut>(attempts: u32, backoff: Duration, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && e.is_transient() => {
                log::warn!("Upload attempt {}/{} failed: {}", attempt, attempts, e);
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Posts the whole `source` to `path` as form field `field`.
pub async fn upload_file_with_retry<T: DeserializeOwned>(
    api: &HttpUploadApi,
    path: &str,
    field: &str,
    source: &UploadSource,
) -> Result<T, ApiError> {
    let data = source.read_chunk(0, source.len() as usize).await?;
    retry_linear(UPLOAD_ATTEMPTS, UPLOAD_BACKOFF, || {
        api.upload_file(
            path,
            field,
            source.filename(),
            source.content_type(),
            data.clone(),
        )
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn server_error() -> ApiError {
        ApiError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "busy".to_string(),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_linear(3, Duration::ZERO, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(server_error())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_linear(3, Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_linear(3, Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ApiError::Status {
                    status: StatusCode::BAD_REQUEST,
                    message: "No thumbnail uploaded".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
