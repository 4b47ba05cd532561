use snafu::Snafu;

use crate::event::StreamTarget;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("backend endpoint is not configured"))]
    MissingEndpoint { stage: &'static str },
    #[snafu(display("failed to build HTTP client on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {url} failed on `{stage}`, {source}"))]
    SendRequest {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("backend returned status {status} on `{stage}`: {body}"))]
    ResponseStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to read response body on `{stage}`, {source}"))]
    ReadBody {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("stream {target:?} delivered an undecodable event: {payload}"))]
    DecodeEvent {
        stage: &'static str,
        target: StreamTarget,
        payload: String,
        source: serde_json::Error,
    },
    #[snafu(display("unexpected response content type '{content_type}'"))]
    UnexpectedContentType {
        stage: &'static str,
        content_type: String,
    },
    #[snafu(display("failed to decode JSON response on `{stage}`, {source}"))]
    DecodeJson {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("stream {target:?} ended before a terminal event"))]
    StreamClosed {
        stage: &'static str,
        target: StreamTarget,
    },
    #[snafu(display("failed to attach file '{name}' to the upload form, {source}"))]
    BuildMultipart {
        stage: &'static str,
        name: String,
        source: reqwest::Error,
    },
}

impl BackendError {
    /// True when the failure is about the shape of what the backend sent rather than
    /// about reaching it.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::DecodeEvent { .. } | Self::UnexpectedContentType { .. } | Self::DecodeJson { .. }
        )
    }
}

pub type BackendResult<T> = Result<T, BackendError>;
