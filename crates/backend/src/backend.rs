use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::BackendResult;
use crate::event::{StreamEnvelope, StreamTarget};
use crate::upload::{PreviewPayload, UploadBatch, UploadResponse};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub request_timeout: Duration,
}

impl BackendConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim().trim_end_matches('/').to_string(),
            username: String::new(),
            password: String::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into().trim().to_string();
        self.password = password.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

/// Opens a full generation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub target: StreamTarget,
    pub input: String,
    pub improve_prompt: bool,
}

impl GenerationRequest {
    pub fn new(target: StreamTarget, input: impl Into<String>) -> Self {
        Self {
            target,
            input: input.into(),
            improve_prompt: false,
        }
    }
}

/// Opens a single-section prompt improvement exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImprovementRequest {
    pub target: StreamTarget,
    pub input: String,
}

impl ImprovementRequest {
    pub fn new(target: StreamTarget, input: impl Into<String>) -> Self {
        Self {
            target,
            input: input.into(),
        }
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type BackendWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Receiving half of an opened stream.
///
/// Dropping it (or calling [`BackendEventStream::cancel`]) tells the worker to stop reading.
pub struct BackendEventStream {
    target: StreamTarget,
    events: mpsc::UnboundedReceiver<StreamEnvelope>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

/// An opened stream: the caller spawns `worker` and drains `stream`.
pub struct BackendStreamHandle {
    pub stream: BackendEventStream,
    pub worker: BackendWorker,
}

impl BackendEventStream {
    pub(crate) fn new(
        target: StreamTarget,
        events: mpsc::UnboundedReceiver<StreamEnvelope>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            target,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn target(&self) -> StreamTarget {
        self.target
    }

    pub async fn recv(&mut self) -> Option<StreamEnvelope> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for BackendEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Streaming text generation.
pub trait GenerationBackend: Send + Sync {
    fn open_generation(&self, request: GenerationRequest) -> BackendResult<BackendStreamHandle>;
    fn open_improvement(&self, request: ImprovementRequest)
    -> BackendResult<BackendStreamHandle>;
}

/// Batch upload and per-file storage operations.
pub trait FileBackend: Send + Sync {
    fn upload<'a>(&'a self, batch: UploadBatch) -> BoxFuture<'a, BackendResult<UploadResponse>>;
    fn delete<'a>(&'a self, identifier: &'a str) -> BoxFuture<'a, BackendResult<()>>;
    fn preview<'a>(&'a self, filename: &'a str) -> BoxFuture<'a, BackendResult<PreviewPayload>>;
}

/// Creates the channel pair behind a [`BackendEventStream`].
///
/// Public so alternative transports (and test doubles) can feed events the same way the
/// HTTP adapter does.
pub fn make_event_stream(
    target: StreamTarget,
) -> (
    mpsc::UnboundedSender<StreamEnvelope>,
    BackendEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        BackendEventStream::new(target, event_rx, cancel_tx),
        cancel_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{StreamEvent, StreamSessionId};

    #[test]
    fn config_normalizes_endpoint_and_credentials() {
        let config = BackendConfig::new("  http://localhost:8000/ ")
            .with_credentials(" lab ", "secret");

        assert_eq!(config.endpoint, "http://localhost:8000");
        assert_eq!(config.username, "lab");
        assert!(config.has_credentials());
        assert!(!BackendConfig::new("http://x").has_credentials());
    }

    #[tokio::test]
    async fn dropping_stream_signals_cancellation() {
        let target = StreamTarget::generation(StreamSessionId::new(3));
        let (event_tx, stream, cancel_rx) = make_event_stream(target);

        event_tx
            .send(StreamEnvelope::new(target, StreamEvent::Complete))
            .expect("receiver alive");
        drop(stream);

        assert!(cancel_rx.await.is_ok());
        assert!(event_tx.is_closed());
    }

    #[tokio::test]
    async fn explicit_cancel_fires_once() {
        let target = StreamTarget::improvement(StreamSessionId::new(1));
        let (_event_tx, mut stream, _cancel_rx) = make_event_stream(target);

        assert_eq!(stream.target(), target);
        assert!(stream.cancel());
        assert!(!stream.cancel());
    }
}
