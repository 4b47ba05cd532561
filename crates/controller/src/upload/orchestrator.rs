use std::path::{Path, PathBuf};
use std::sync::Arc;

use atlas_backend::{FileBackend, PreviewDescriptor, UploadBatch, UploadResponse};
use bytes::Bytes;
use snafu::{OptionExt, ResultExt, ensure};

use super::validate::FilePolicy;
use crate::attachments::{
    AddOutcome, AttachedFile, Attachment, AttachmentContext, AttachmentKey, AttachmentRegistry,
    PreviewReference,
};
use crate::context::SessionContext;
use crate::error::{
    ControllerError, ControllerResult, NoSupportedFilesSnafu, ProtocolSnafu, UnsupportedFileSnafu,
    ValidationSnafu, WriteFileSnafu,
};
use crate::sink::ErrorReporter;

/// A downloadable result of batch execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    pub run_index: u64,
    pub label: String,
    pub suggested_file_name: String,
    pub archive: Bytes,
}

impl ArchiveRecord {
    pub fn new(run_index: u64, archive: Bytes) -> Self {
        Self {
            run_index,
            label: format!("Results (run {run_index})"),
            suggested_file_name: format!("results_run_{run_index}.zip"),
            archive,
        }
    }

    /// Writes the archive under `dir` with its suggested name and returns the path.
    pub async fn save_into(&self, dir: &Path) -> ControllerResult<PathBuf> {
        tokio::fs::create_dir_all(dir).await.context(WriteFileSnafu {
            stage: "create-download-dir",
            path: dir.to_path_buf(),
        })?;

        let path = dir.join(&self.suggested_file_name);
        tokio::fs::write(&path, &self.archive)
            .await
            .context(WriteFileSnafu {
                stage: "write-archive",
                path: path.clone(),
            })?;
        tracing::info!(path = %path.display(), run = self.run_index, "saved archive");
        Ok(path)
    }
}

/// What one upload produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadReport {
    Archive(ArchiveRecord),
    Previews {
        context: AttachmentContext,
        outcomes: Vec<AddOutcome>,
    },
}

/// Validates files, sends exactly one batched request and routes the result.
pub struct UploadOrchestrator {
    backend: Arc<dyn FileBackend>,
    policy: FilePolicy,
    results: Vec<ArchiveRecord>,
}

impl UploadOrchestrator {
    pub fn new(backend: Arc<dyn FileBackend>, policy: FilePolicy) -> Self {
        Self {
            backend,
            policy,
            results: Vec::new(),
        }
    }

    pub fn policy(&self) -> &FilePolicy {
        &self.policy
    }

    /// Archives received so far, oldest first.
    pub fn results(&self) -> &[ArchiveRecord] {
        &self.results
    }

    /// Uploads the supported subset of `files` in one request.
    ///
    /// Each unsupported file is reported through `errors` by name without stopping the
    /// rest. Everything else is all-or-nothing: a failure returns `Err` and changes no
    /// state.
    pub async fn submit(
        &mut self,
        ctx: &mut SessionContext,
        registry: &mut AttachmentRegistry,
        context: AttachmentContext,
        files: Vec<AttachedFile>,
        execute_requested: bool,
        script_text: Option<&str>,
        errors: &mut dyn ErrorReporter,
    ) -> ControllerResult<UploadReport> {
        ensure!(
            !files.is_empty(),
            ValidationSnafu {
                stage: "upload-validate",
                details: "select at least one file to upload",
            }
        );

        let script = script_text.map(str::trim).unwrap_or_default();
        ensure!(
            !execute_requested || !script.is_empty(),
            ValidationSnafu {
                stage: "upload-validate",
                details: "enter a macro script before executing it",
            }
        );

        let (valid, invalid) = self.policy.partition(files);
        for file in &invalid {
            let error = UnsupportedFileSnafu {
                stage: "upload-validate",
                name: file.name.clone(),
            }
            .build();
            tracing::warn!(file = %file.name, "skipping unsupported file");
            errors.report_error(&error.to_string());
        }
        ensure!(
            !valid.is_empty(),
            NoSupportedFilesSnafu {
                stage: "upload-validate",
            }
        );

        let upload_files: Vec<_> = valid.iter().map(AttachedFile::to_upload_file).collect();
        let batch = if execute_requested {
            UploadBatch::execute(upload_files, script)
        } else {
            UploadBatch::preview_only(upload_files)
        };

        tracing::info!(
            files = valid.len(),
            execute = execute_requested,
            context = %context,
            "uploading batch"
        );
        let response = self
            .backend
            .upload(batch)
            .await
            .map_err(|error| ControllerError::from_backend("upload", error))?;

        match response {
            UploadResponse::Archive(archive) => {
                let record = ArchiveRecord::new(ctx.next_run_index(), archive);
                tracing::info!(label = %record.label, bytes = record.archive.len(), "received archive");
                self.results.push(record.clone());
                Ok(UploadReport::Archive(record))
            }
            UploadResponse::PreviewList(descriptors) => {
                let attachments = pair_descriptors(context, valid, descriptors)?;
                let outcomes = attachments
                    .into_iter()
                    .map(|attachment| registry.insert(attachment))
                    .collect();
                Ok(UploadReport::Previews { context, outcomes })
            }
        }
    }

    /// Fetches a fresh preview for an attachment and re-renders it.
    pub async fn refresh_preview(
        &self,
        registry: &mut AttachmentRegistry,
        context: AttachmentContext,
        key: &AttachmentKey,
    ) -> ControllerResult<PreviewReference> {
        let identifier = registry
            .get(context, key)
            .map(|attachment| attachment.remote_identifier().to_string())
            .with_context(|| ValidationSnafu {
                stage: "refresh-preview",
                details: format!("{key} is not attached in the {context} context"),
            })?;

        let payload = self
            .backend
            .preview(&identifier)
            .await
            .map_err(|error| ControllerError::from_backend("refresh-preview", error))?;

        let preview = PreviewReference::Encoded(payload.preview);
        registry.update_preview(context, key, preview.clone());
        Ok(preview)
    }
}

/// Pairs descriptors with the uploaded files by position, rejecting the whole batch on any
/// mismatch or per-file failure.
fn pair_descriptors(
    context: AttachmentContext,
    files: Vec<AttachedFile>,
    descriptors: Vec<PreviewDescriptor>,
) -> ControllerResult<Vec<Attachment>> {
    ensure!(
        descriptors.len() == files.len(),
        ProtocolSnafu {
            stage: "pair-previews",
            details: format!(
                "expected {} previews but the backend returned {}",
                files.len(),
                descriptors.len()
            ),
        }
    );

    files
        .into_iter()
        .zip(descriptors)
        .map(|(file, descriptor)| {
            if let Some(error) = descriptor.error {
                return ProtocolSnafu {
                    stage: "pair-previews",
                    details: format!("backend could not process '{}': {error}", file.name),
                }
                .fail();
            }

            let preview = descriptor.preview.with_context(|| ProtocolSnafu {
                stage: "pair-previews",
                details: format!("backend returned no preview for '{}'", file.name),
            })?;

            let server_id = descriptor
                .unique_filename
                .filter(|name| !name.is_empty())
                .unwrap_or(descriptor.filename);

            let attachment = Attachment::new(file, context, PreviewReference::Encoded(preview));
            Ok(if server_id.is_empty() {
                attachment
            } else {
                attachment.with_server_id(server_id)
            })
        })
        .collect()
}
