use std::path::PathBuf;
use std::sync::Arc;

use atlas_backend::{FileBackend, GenerationBackend, HttpBackend, create_backend};
use atlas_controller::SessionContext;
use atlas_controller::attachments::{
    AttachmentContext, AttachmentRegistry, deletion_channel, run_deletion_worker,
};
use atlas_controller::chat::SessionController;
use atlas_controller::settings::{AtlasSettings, SettingsStore};
use atlas_controller::upload::UploadOrchestrator;
use snafu::ResultExt;
use tokio::task::JoinHandle;

use crate::error::{BackendSnafu, CliResult, ControllerSnafu};
use crate::terminal::TerminalSurface;

/// Everything a command needs, built once from settings.
pub struct App {
    pub settings: Arc<AtlasSettings>,
    pub backend: Arc<HttpBackend>,
    pub ctx: SessionContext,
}

impl App {
    pub fn connect(config_path: Option<PathBuf>) -> CliResult<Self> {
        let store = match config_path {
            Some(path) => SettingsStore::new(path),
            None => SettingsStore::load(),
        };
        let settings = store.settings();
        tracing::debug!(path = %store.config_path().display(), "loaded settings");

        let backend = create_backend(settings.to_backend_config()).context(BackendSnafu {
            stage: "create-backend",
        })?;
        if !backend.config().has_credentials() {
            tracing::warn!("no username configured; requests are sent without authentication");
        }

        Ok(Self {
            settings,
            backend,
            ctx: SessionContext::new(),
        })
    }

    pub fn generation_backend(&self) -> Arc<dyn GenerationBackend> {
        self.backend.clone()
    }

    pub fn file_backend(&self) -> Arc<dyn FileBackend> {
        self.backend.clone()
    }

    pub fn session_controller(&self) -> SessionController {
        SessionController::new(self.generation_backend())
    }

    pub fn upload_orchestrator(&self) -> UploadOrchestrator {
        UploadOrchestrator::new(self.file_backend(), self.settings.file_policy())
    }

    /// Builds the registry with terminal surfaces and starts its deletion worker.
    pub fn attachment_registry(&self) -> CliResult<(AttachmentRegistry, JoinHandle<usize>)> {
        let (queue, requests) = deletion_channel();
        let mut builder = AttachmentRegistry::builder(queue);
        for context in AttachmentContext::ALL {
            builder = builder.with_surface(context, Box::new(TerminalSurface));
        }
        let registry = builder.build().context(ControllerSnafu {
            stage: "build-attachment-registry",
        })?;

        let worker = tokio::spawn(run_deletion_worker(requests, self.file_backend()));
        Ok((registry, worker))
    }
}

/// Drops the registry and waits for queued deletions to go out.
pub async fn drain_deletions(registry: AttachmentRegistry, worker: JoinHandle<usize>) {
    drop(registry);
    match worker.await {
        Ok(deleted) => tracing::debug!(deleted, "deletion worker finished"),
        Err(error) => tracing::warn!(error = %error, "deletion worker failed"),
    }
}
