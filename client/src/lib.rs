//! Admin-side upload client: a multipart upload driver over the episodic
//! HTTP API, plus retried single-request uploads.

pub mod api;
pub mod driver;
pub mod error;
pub mod retry;
pub mod source;

pub use api::{HttpUploadApi, UploadApi};
pub use driver::{CancelToken, DriverConfig, Progress, UploadSession, UploadState, Uploader};
pub use error::{ApiError, DriverError};
pub use retry::upload_file_with_retry;
pub use source::{ChunkPlan, UploadSource};
