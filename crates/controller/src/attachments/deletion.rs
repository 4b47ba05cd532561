use std::sync::Arc;

use atlas_backend::FileBackend;
use tokio::sync::mpsc;

use super::AttachmentContext;

/// A best-effort request to drop a file from backend storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionRequest {
    pub context: AttachmentContext,
    pub identifier: String,
}

/// Sending half of the deletion queue. Enqueueing never blocks and never fails the caller.
#[derive(Debug, Clone)]
pub struct DeletionQueue {
    tx: mpsc::UnboundedSender<DeletionRequest>,
}

impl DeletionQueue {
    pub fn enqueue(&self, request: DeletionRequest) {
        if let Err(error) = self.tx.send(request) {
            tracing::warn!(
                identifier = %error.0.identifier,
                "deletion worker is gone; dropping request"
            );
        }
    }
}

pub fn deletion_channel() -> (DeletionQueue, mpsc::UnboundedReceiver<DeletionRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DeletionQueue { tx }, rx)
}

/// Sends queued deletions one at a time until every queue handle is dropped.
///
/// Failures are only logged; local state is never rolled back. Returns how many requests
/// the backend accepted.
pub async fn run_deletion_worker(
    mut requests: mpsc::UnboundedReceiver<DeletionRequest>,
    backend: Arc<dyn FileBackend>,
) -> usize {
    let mut deleted = 0;
    while let Some(request) = requests.recv().await {
        match backend.delete(&request.identifier).await {
            Ok(()) => {
                deleted += 1;
                tracing::debug!(
                    context = %request.context,
                    identifier = %request.identifier,
                    "deleted remote file"
                );
            }
            Err(error) => {
                tracing::warn!(
                    context = %request.context,
                    identifier = %request.identifier,
                    error = %error,
                    "failed to delete remote file"
                );
            }
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use atlas_backend::{
        BackendError, BackendResult, BoxFuture, PreviewPayload, UploadBatch, UploadResponse,
    };

    use super::*;

    #[derive(Default)]
    struct DeleteRecorder {
        deleted: Mutex<Vec<String>>,
    }

    impl FileBackend for DeleteRecorder {
        fn upload<'a>(
            &'a self,
            _batch: UploadBatch,
        ) -> BoxFuture<'a, BackendResult<UploadResponse>> {
            Box::pin(async { Ok(UploadResponse::PreviewList(Vec::new())) })
        }

        fn delete<'a>(&'a self, identifier: &'a str) -> BoxFuture<'a, BackendResult<()>> {
            Box::pin(async move {
                self.deleted
                    .lock()
                    .expect("deleted lock")
                    .push(identifier.to_string());
                if identifier.starts_with("missing") {
                    return Err(BackendError::ResponseStatus {
                        stage: "delete-file",
                        status: 404,
                        body: "not found".to_string(),
                    });
                }
                Ok(())
            })
        }

        fn preview<'a>(
            &'a self,
            _filename: &'a str,
        ) -> BoxFuture<'a, BackendResult<PreviewPayload>> {
            Box::pin(async {
                Ok(PreviewPayload {
                    preview: String::new(),
                })
            })
        }
    }

    #[tokio::test]
    async fn failures_are_logged_and_the_worker_keeps_going() {
        let backend = Arc::new(DeleteRecorder::default());
        let (queue, requests) = deletion_channel();

        for identifier in ["missing.tif", "kept.tif"] {
            queue.enqueue(DeletionRequest {
                context: AttachmentContext::Batch,
                identifier: identifier.to_string(),
            });
        }
        drop(queue);

        let deleted = run_deletion_worker(requests, backend.clone()).await;

        assert_eq!(deleted, 1);
        assert_eq!(
            *backend.deleted.lock().expect("deleted lock"),
            vec!["missing.tif".to_string(), "kept.tif".to_string()]
        );
    }

    #[test]
    fn enqueue_after_worker_exit_does_not_panic() {
        let (queue, requests) = deletion_channel();
        drop(requests);
        queue.enqueue(DeletionRequest {
            context: AttachmentContext::Conversational,
            identifier: "late.png".to_string(),
        });
    }
}
