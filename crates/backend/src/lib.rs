#![deny(unsafe_code)]

use std::sync::Arc;

mod backend;
mod error;
mod event;
mod http_adapter;
pub mod sse;
mod upload;

pub use backend::{
    BackendConfig, BackendEventStream, BackendStreamHandle, BackendWorker, BoxFuture,
    DEFAULT_REQUEST_TIMEOUT, FileBackend, GenerationBackend, GenerationRequest,
    ImprovementRequest, make_event_stream,
};
pub use error::{BackendError, BackendResult};
pub use event::{
    DESCRIPTION_SECTION, EXPLANATION_SECTION, IMPROVED_PROMPT_SECTION, MACRO_SCRIPT_SECTION,
    SectionName, StreamEnvelope, StreamEvent, StreamKind, StreamSessionId, StreamTarget,
    USER_INPUT_SECTION,
};
pub use http_adapter::{
    DELETE_PATH, GENERATION_PATH, HttpBackend, IMPROVEMENT_PATH, PREVIEW_PATH, UPLOAD_PATH,
};
pub use upload::{
    PreviewDescriptor, PreviewPayload, UploadBatch, UploadFile, UploadResponse,
    classify_upload_response,
};

/// Builds the HTTP backend once and shares it between the generation and file capabilities.
pub fn create_backend(config: BackendConfig) -> BackendResult<Arc<HttpBackend>> {
    let backend = HttpBackend::new(config)?;
    tracing::info!(endpoint = %backend.config().endpoint, "created http backend");
    Ok(Arc::new(backend))
}
