use reqwest::StatusCode;

/// Failure of one call to the upload endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server answered {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Transport failures and 5xx answers may succeed when repeated.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => status.is_server_error(),
            ApiError::Decode(_) | ApiError::Io(_) => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("an upload is already in progress")]
    UploadAlreadyInProgress,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("Upload aborted: {reason}")]
    Aborted { reason: String },
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl DriverError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, DriverError::Aborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses() {
        let server = ApiError::Status {
            status: StatusCode::BAD_GATEWAY,
            message: "part failed".to_string(),
        };
        let client = ApiError::Status {
            status: StatusCode::BAD_REQUEST,
            message: "bad".to_string(),
        };
        assert!(server.is_transient());
        assert!(!client.is_transient());
    }

    #[test]
    fn test_aborted_message_is_recognizable() {
        let err = DriverError::Aborted {
            reason: "part 2 failed".to_string(),
        };
        assert!(err.to_string().starts_with("Upload aborted"));
        assert!(err.is_aborted());
    }
}
