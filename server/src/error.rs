use warp::http::StatusCode;

use crate::courses::CourseError;
use crate::multipart::UploadError;
use crate::storage::StorageError;
use crate::webhooks::WebhookError;

/// A request failure with the status it should be answered with.
#[derive(Debug)]
pub struct ApiRejection {
    pub status: StatusCode,
    pub message: String,
}

impl warp::reject::Reject for ApiRejection {}

impl ApiRejection {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiRejection {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Not authenticated")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        log::error!("Internal error: {}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
    }
}

impl From<UploadError> for ApiRejection {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::InvalidInput(_) | UploadError::IncompleteUpload(_) => {
                StatusCode::BAD_REQUEST
            }
            UploadError::NoSuchUpload(_) => StatusCode::NOT_FOUND,
            UploadError::PartUploadFailed { .. } => StatusCode::BAD_GATEWAY,
            UploadError::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            UploadError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            UploadError::Storage(_) => StatusCode::BAD_GATEWAY,
        };
        ApiRejection::new(status, err.to_string())
    }
}

impl From<CourseError> for ApiRejection {
    fn from(err: CourseError) -> Self {
        match err {
            CourseError::NotFound(_) => ApiRejection::new(StatusCode::NOT_FOUND, err.to_string()),
            CourseError::Invalid(_) => ApiRejection::bad_request(err.to_string()),
            CourseError::Locked => ApiRejection::forbidden(err.to_string()),
            CourseError::StorageUnavailable => {
                ApiRejection::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            CourseError::Storage(e) => ApiRejection::new(StatusCode::BAD_GATEWAY, e.to_string()),
            CourseError::Db(e) => ApiRejection::internal(e),
        }
    }
}

impl From<WebhookError> for ApiRejection {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::InvalidSignature => {
                ApiRejection::new(StatusCode::UNAUTHORIZED, err.to_string())
            }
            WebhookError::MissingEmail => ApiRejection::bad_request(err.to_string()),
            WebhookError::UnknownCustomer => {
                ApiRejection::new(StatusCode::NOT_FOUND, err.to_string())
            }
            WebhookError::Internal(e) => ApiRejection::internal(e),
        }
    }
}

/// Glue errors are validation failures unless they come from the database.
pub fn from_anyhow(err: anyhow::Error) -> ApiRejection {
    if err.downcast_ref::<sqlx::Error>().is_some() {
        ApiRejection::internal(err)
    } else {
        ApiRejection::bad_request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_error_statuses() {
        let cases = [
            (UploadError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (UploadError::IncompleteUpload("x".into()), StatusCode::BAD_REQUEST),
            (UploadError::NoSuchUpload("x".into()), StatusCode::NOT_FOUND),
            (
                UploadError::PartUploadFailed {
                    part_number: 2,
                    source: StorageError::Backend("boom".into()),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (UploadError::BackendUnavailable, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(ApiRejection::from(err).status, status);
        }
    }

    #[test]
    fn test_anyhow_validation_is_bad_request() {
        let rejection = from_anyhow(anyhow::anyhow!("Invalid email format"));
        assert_eq!(rejection.status, StatusCode::BAD_REQUEST);
        assert_eq!(rejection.message, "Invalid email format");
    }
}
