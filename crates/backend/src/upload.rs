use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use snafu::ResultExt;

use crate::error::{BackendResult, DecodeJsonSnafu, UnexpectedContentTypeSnafu};

/// One file as it goes over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub media_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            media_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }
}

/// A single batched upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadBatch {
    pub files: Vec<UploadFile>,
    pub execute_macro: bool,
    /// Only sent when `execute_macro` is set.
    pub macro_script: Option<String>,
}

impl UploadBatch {
    pub fn preview_only(files: Vec<UploadFile>) -> Self {
        Self {
            files,
            execute_macro: false,
            macro_script: None,
        }
    }

    pub fn execute(files: Vec<UploadFile>, macro_script: impl Into<String>) -> Self {
        Self {
            files,
            execute_macro: true,
            macro_script: Some(macro_script.into()),
        }
    }
}

/// Per-file entry of a structured upload response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreviewDescriptor {
    #[serde(default)]
    pub filename: String,
    /// Storage name the backend assigned; used for later deletion and preview fetches.
    #[serde(default)]
    pub unique_filename: Option<String>,
    /// Encoded preview image data.
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PreviewListBody {
    #[serde(default)]
    results: Vec<PreviewDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PreviewPayload {
    pub preview: String,
}

/// The two shapes an upload can come back as, resolved once from the content type.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadResponse {
    Archive(Bytes),
    PreviewList(Vec<PreviewDescriptor>),
}

const ARCHIVE_CONTENT_TYPES: [&str; 3] = [
    "application/zip",
    "application/x-zip-compressed",
    "application/octet-stream",
];
const JSON_CONTENT_TYPE: &str = "application/json";

/// Decides the response shape from the declared content type only.
pub fn classify_upload_response(content_type: &str, body: Bytes) -> BackendResult<UploadResponse> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if ARCHIVE_CONTENT_TYPES.contains(&essence.as_str()) {
        return Ok(UploadResponse::Archive(body));
    }

    if essence == JSON_CONTENT_TYPE {
        let parsed: PreviewListBody = serde_json::from_slice(&body).context(DecodeJsonSnafu {
            stage: "decode-preview-list",
        })?;
        return Ok(UploadResponse::PreviewList(parsed.results));
    }

    UnexpectedContentTypeSnafu {
        stage: "classify-upload-response",
        content_type: content_type.to_string(),
    }
    .fail()
}
