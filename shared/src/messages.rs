//! Request and response bodies of the media upload protocol.
//!
//! Field names follow the wire format used by the admin upload client:
//! camelCase for our own fields, `ETag` / `PartNumber` for part tokens
//! since those are handed back verbatim to the storage backend.

use serde::{Deserialize, Serialize};

/// Multipart form field carrying the chunk bytes of an `upload-part` call.
pub const PART_FIELD: &str = "part";
pub const KEY_FIELD: &str = "key";
pub const UPLOAD_ID_FIELD: &str = "uploadId";
pub const PART_NUMBER_FIELD: &str = "partNumber";

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadRequest {
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadResponse {
    pub key: String,
    pub upload_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct UploadPartResponse {
    #[serde(rename = "ETag")]
    pub e_tag: String,
}

/// Completion token of one uploaded part.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CompletedPart {
    #[serde(rename = "ETag")]
    pub e_tag: String,
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub key: String,
    pub upload_id: String,
    pub parts: Vec<CompletedPart>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    pub key: String,
    pub location: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortUploadRequest {
    pub key: String,
    pub upload_id: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AbortUploadResponse {
    pub ok: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignUploadRequest {
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignUploadResponse {
    pub key: String,
    pub signed_put_url: String,
}

/// Response of a single-shot upload to the public bucket.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUploadResponse {
    pub key: String,
    pub public_url: String,
}

/// Response of a single-shot upload to the private bucket.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewUploadResponse {
    pub key: String,
    pub preview_url: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ErrorMessage {
    pub code: u16,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_part_uses_backend_field_names() {
        let part = CompletedPart {
            e_tag: "\"abc\"".to_string(),
            part_number: 2,
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["ETag"], "\"abc\"");
        assert_eq!(json["PartNumber"], 2);
    }

    #[test]
    fn test_start_request_without_content_type() {
        let req: StartUploadRequest =
            serde_json::from_str(r#"{"filename":"intro.mp4"}"#).unwrap();
        assert_eq!(req.filename, "intro.mp4");
        assert!(req.content_type.is_none());
    }

    #[test]
    fn test_complete_request_wire_format() {
        let req: CompleteUploadRequest = serde_json::from_str(
            r#"{"key":"k","uploadId":"u","parts":[{"ETag":"e1","PartNumber":1}]}"#,
        )
        .unwrap();
        assert_eq!(req.upload_id, "u");
        assert_eq!(req.parts[0].part_number, 1);
    }
}
