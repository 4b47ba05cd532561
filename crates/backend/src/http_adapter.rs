use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::backend::{
    BackendConfig, BackendStreamHandle, BackendWorker, BoxFuture, FileBackend, GenerationBackend,
    GenerationRequest, ImprovementRequest, make_event_stream,
};
use super::error::{
    BackendError, BackendResult, BuildClientSnafu, BuildMultipartSnafu, MissingEndpointSnafu,
    ReadBodySnafu, ResponseStatusSnafu, SendRequestSnafu,
};
use super::event::{StreamEnvelope, StreamEvent, StreamTarget};
use super::sse::{SseDecoder, decode_wire_event};
use super::upload::{PreviewPayload, UploadBatch, UploadResponse, classify_upload_response};

pub const GENERATION_PATH: &str = "/api/v1/stream-generate-macro";
pub const IMPROVEMENT_PATH: &str = "/api/v1/stream-improve-prompt/";
pub const UPLOAD_PATH: &str = "/upload-image/";
pub const DELETE_PATH: &str = "/delete-image";
pub const PREVIEW_PATH: &str = "/get-image-preview";

const ERROR_BODY_LIMIT: usize = 512;

/// Everything but RFC 3986 unreserved characters is escaped inside a path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Talks to the image-analysis backend over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    config: BackendConfig,
    client: Client,
}

enum StreamOutcome {
    Terminal,
    Cancelled,
    Closed,
}

enum Forwarded {
    Continue,
    Terminal,
    Disconnected,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        ensure!(
            !config.endpoint.is_empty(),
            MissingEndpointSnafu {
                stage: "http-backend-new",
            }
        );

        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "build-client",
            })?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.config.has_credentials() {
            builder.basic_auth(&self.config.username, Some(&self.config.password))
        } else {
            builder
        }
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        url: &str,
        stage: &'static str,
    ) -> BackendResult<Response> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .context(SendRequestSnafu {
                stage,
                url: url.to_string(),
            })?;
        ensure_success(response, stage).await
    }

    fn spawn_stream(
        &self,
        target: StreamTarget,
        builder: RequestBuilder,
        url: String,
    ) -> BackendStreamHandle {
        let (event_tx, stream, cancel_rx) = make_event_stream(target);
        let builder = self.authorize(builder.header(ACCEPT, "text/event-stream"));
        let worker: BackendWorker =
            Box::pin(Self::run_stream_worker(target, builder, url, event_tx, cancel_rx));
        BackendStreamHandle { stream, worker }
    }

    async fn run_stream_worker(
        target: StreamTarget,
        builder: RequestBuilder,
        url: String,
        event_tx: mpsc::UnboundedSender<StreamEnvelope>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let opened = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(target = ?target, "stream cancelled before it opened");
                return;
            }
            response = builder.send() => response,
        };

        let response = match opened.context(SendRequestSnafu {
            stage: "open-stream",
            url: url.clone(),
        }) {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(target = ?target, url = %url, error = %error, "failed to open backend stream");
                Self::emit_error_event(&event_tx, target, &error);
                return;
            }
        };

        let response = match ensure_success(response, "open-stream-status").await {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(target = ?target, error = %error, "backend rejected stream request");
                Self::emit_error_event(&event_tx, target, &error);
                return;
            }
        };

        match Self::pump_events(target, response, &event_tx, &mut cancel_rx).await {
            StreamOutcome::Terminal => {}
            StreamOutcome::Cancelled => {
                tracing::debug!(target = ?target, "backend stream cancelled");
            }
            StreamOutcome::Closed => {
                tracing::debug!(target = ?target, "backend stream closed without a terminal event");
            }
        }
    }

    async fn pump_events(
        target: StreamTarget,
        response: Response,
        event_tx: &mpsc::UnboundedSender<StreamEnvelope>,
        cancel_rx: &mut oneshot::Receiver<()>,
    ) -> StreamOutcome {
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            tokio::select! {
                _ = &mut *cancel_rx => return StreamOutcome::Cancelled,
                next_chunk = body.next() => {
                    let (payloads, finished) = match next_chunk {
                        Some(Ok(chunk)) => (decoder.push(&chunk), false),
                        Some(Err(source)) => {
                            tracing::warn!(target = ?target, error = %source, "backend stream emitted an error chunk");
                            let error = BackendError::ReadBody {
                                stage: "stream-chunk",
                                source,
                            };
                            Self::emit_error_event(event_tx, target, &error);
                            return StreamOutcome::Terminal;
                        }
                        None => (decoder.finish().into_iter().collect::<Vec<_>>(), true),
                    };

                    for payload in &payloads {
                        match Self::forward_payload(target, payload, event_tx) {
                            Forwarded::Continue => {}
                            Forwarded::Terminal => return StreamOutcome::Terminal,
                            Forwarded::Disconnected => return StreamOutcome::Cancelled,
                        }
                    }

                    if finished {
                        return StreamOutcome::Closed;
                    }
                }
            }
        }
    }

    fn forward_payload(
        target: StreamTarget,
        payload: &str,
        event_tx: &mpsc::UnboundedSender<StreamEnvelope>,
    ) -> Forwarded {
        let event = match decode_wire_event(target, payload) {
            Ok(Some(event)) => event,
            Ok(None) => return Forwarded::Continue,
            Err(error) => {
                tracing::warn!(target = ?target, error = %error, "dropping stream after undecodable event");
                StreamEvent::error(error.to_string())
            }
        };

        let terminal = event.is_terminal();
        if event_tx.send(StreamEnvelope::new(target, event)).is_err() {
            return Forwarded::Disconnected;
        }

        if terminal {
            Forwarded::Terminal
        } else {
            Forwarded::Continue
        }
    }

    fn emit_error_event(
        event_tx: &mpsc::UnboundedSender<StreamEnvelope>,
        target: StreamTarget,
        error: &BackendError,
    ) {
        let _ = event_tx.send(StreamEnvelope::new(
            target,
            StreamEvent::error(error.to_string()),
        ));
    }

    async fn upload_batch(&self, batch: UploadBatch) -> BackendResult<UploadResponse> {
        let mut form = Form::new().text("execute_macro", batch.execute_macro.to_string());
        if batch.execute_macro
            && let Some(script) = batch.macro_script
        {
            form = form.text("macro_script", script);
        }

        for file in batch.files {
            let mut part = Part::stream(file.bytes).file_name(file.name.clone());
            if let Some(media_type) = file.media_type.as_deref() {
                part = part.mime_str(media_type).context(BuildMultipartSnafu {
                    stage: "upload-part-mime",
                    name: file.name.clone(),
                })?;
            }
            form = form.part("files", part);
        }

        let url = self.url(UPLOAD_PATH);
        let response = self
            .send(self.client.post(&url).multipart(form), &url, "upload-batch")
            .await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().await.context(ReadBodySnafu {
            stage: "read-upload-response",
        })?;

        classify_upload_response(&content_type, body)
    }

    async fn delete_file(&self, identifier: &str) -> BackendResult<()> {
        let url = format!("{}/{}", self.url(DELETE_PATH), utf8_percent_encode(identifier, PATH_SEGMENT));
        self.send(self.client.delete(&url), &url, "delete-file").await?;
        Ok(())
    }

    async fn fetch_preview(&self, filename: &str) -> BackendResult<PreviewPayload> {
        let url = format!("{}/{}", self.url(PREVIEW_PATH), utf8_percent_encode(filename, PATH_SEGMENT));
        let response = self.send(self.client.get(&url), &url, "fetch-preview").await?;
        response.json::<PreviewPayload>().await.context(ReadBodySnafu {
            stage: "decode-preview-response",
        })
    }
}

impl GenerationBackend for HttpBackend {
    fn open_generation(&self, request: GenerationRequest) -> BackendResult<BackendStreamHandle> {
        let url = self.url(GENERATION_PATH);
        let builder = self.client.get(&url).query(&[
            ("input", request.input.as_str()),
            ("improve_prompt", if request.improve_prompt { "true" } else { "false" }),
        ]);
        tracing::info!(target = ?request.target, improve_prompt = request.improve_prompt, "opening generation stream");
        Ok(self.spawn_stream(request.target, builder, url))
    }

    fn open_improvement(
        &self,
        request: ImprovementRequest,
    ) -> BackendResult<BackendStreamHandle> {
        let url = self.url(IMPROVEMENT_PATH);
        let builder = self
            .client
            .get(&url)
            .query(&[("input", request.input.as_str())]);
        tracing::info!(target = ?request.target, "opening improvement stream");
        Ok(self.spawn_stream(request.target, builder, url))
    }
}

impl FileBackend for HttpBackend {
    fn upload<'a>(&'a self, batch: UploadBatch) -> BoxFuture<'a, BackendResult<UploadResponse>> {
        Box::pin(self.upload_batch(batch))
    }

    fn delete<'a>(&'a self, identifier: &'a str) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(self.delete_file(identifier))
    }

    fn preview<'a>(&'a self, filename: &'a str) -> BoxFuture<'a, BackendResult<PreviewPayload>> {
        Box::pin(self.fetch_preview(filename))
    }
}

async fn ensure_success(response: Response, stage: &'static str) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    ResponseStatusSnafu {
        stage,
        status: status.as_u16(),
        body: truncate_text(&body, ERROR_BODY_LIMIT),
    }
    .fail()
}

fn truncate_text(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
