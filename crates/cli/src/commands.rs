use std::io::Stdout;
use std::path::{Path, PathBuf};

use atlas_backend::{FileBackend, MACRO_SCRIPT_SECTION};
use atlas_controller::attachments::AttachmentContext;
use atlas_controller::chat::{SessionController, StreamOutcome};
use atlas_controller::upload::UploadReport;
use snafu::ResultExt;

use crate::app::{App, drain_deletions};
use crate::error::{BackendSnafu, CliResult, ControllerSnafu, UsageSnafu};
use crate::files::{decode_preview, read_attachments, read_text, write_output};
use crate::terminal::{StderrReporter, TerminalSink};

struct StreamRun {
    controller: SessionController,
    sink: TerminalSink<Stdout>,
    errors: StderrReporter,
}

impl StreamRun {
    fn new(app: &App) -> Self {
        Self {
            controller: app.session_controller(),
            sink: TerminalSink::new(std::io::stdout()),
            errors: StderrReporter::default(),
        }
    }

    async fn submit(&mut self, app: &mut App, text: &str, improve: bool) -> CliResult<StreamOutcome> {
        self.controller
            .submit_turn(&mut app.ctx, text, improve, &mut self.sink)
            .context(ControllerSnafu {
                stage: "submit-turn",
            })?;

        let outcome = tokio::select! {
            outcome = self.controller.run_active_stream(&mut app.ctx, &mut self.sink, &mut self.errors) => outcome,
            _ = tokio::signal::ctrl_c() => None,
        };
        match outcome.or_else(|| self.controller.cancel_active_stream(&mut app.ctx)) {
            Some(StreamOutcome::Failed { message, .. }) => UsageSnafu {
                stage: "run-stream",
                details: format!("stream failed: {message}"),
            }
            .fail(),
            Some(StreamOutcome::Cancelled { .. }) | None => UsageSnafu {
                stage: "run-stream",
                details: "interrupted",
            }
            .fail(),
            Some(outcome) => Ok(outcome),
        }
    }
}

pub async fn generate(
    app: &mut App,
    prompt: &str,
    improve: bool,
    script_out: Option<&Path>,
) -> CliResult<()> {
    let mut run = StreamRun::new(app);

    let mut prompt = prompt.to_string();
    if improve {
        if let StreamOutcome::Improved { prompt: improved } = run.submit(app, &prompt, true).await? {
            prompt = improved;
        }
    }

    let turn = match run.submit(app, &prompt, improve).await? {
        StreamOutcome::TurnCompleted { turn } => turn,
        outcome => {
            return UsageSnafu {
                stage: "generate",
                details: format!("unexpected stream outcome {outcome:?}"),
            }
            .fail();
        }
    };

    if let Some(path) = script_out {
        let script = run
            .sink
            .finalized(turn, MACRO_SCRIPT_SECTION)
            .filter(|script| !script.is_empty())
            .map(str::to_string);
        let Some(script) = script else {
            return UsageSnafu {
                stage: "generate",
                details: "the response did not contain a macro script",
            }
            .fail();
        };
        write_output(path, script.as_bytes()).await?;
        eprintln!("saved macro script to {}", path.display());
    }
    Ok(())
}

pub async fn improve(app: &mut App, prompt: &str) -> CliResult<()> {
    let mut run = StreamRun::new(app);
    run.submit(app, prompt, true).await?;
    Ok(())
}

pub async fn upload(
    app: &mut App,
    paths: &[PathBuf],
    script_path: Option<&Path>,
    out_dir: Option<&Path>,
) -> CliResult<()> {
    let files = read_attachments(paths).await?;
    let script = match script_path {
        Some(path) => Some(read_text(path).await?),
        None => None,
    };

    let mut orchestrator = app.upload_orchestrator();
    let (mut registry, worker) = app.attachment_registry()?;
    let mut errors = StderrReporter::default();

    let result = orchestrator
        .submit(
            &mut app.ctx,
            &mut registry,
            AttachmentContext::Batch,
            files,
            script.is_some(),
            script.as_deref(),
            &mut errors,
        )
        .await;

    let outcome = match result {
        Ok(UploadReport::Archive(record)) => {
            let dir = out_dir
                .map(Path::to_path_buf)
                .unwrap_or_else(|| app.settings.download_dir());
            let path = record.save_into(&dir).await.context(ControllerSnafu {
                stage: "save-archive",
            })?;
            println!("{}: {}", record.label, path.display());
            Ok(())
        }
        Ok(UploadReport::Previews { context, .. }) => {
            for attachment in registry.list_by_context(context) {
                println!(
                    "{}\t{}",
                    attachment.file.name,
                    attachment.remote_identifier()
                );
            }
            Ok(())
        }
        Err(source) => Err(source).context(ControllerSnafu { stage: "upload" }),
    };

    drain_deletions(registry, worker).await;
    outcome
}

pub async fn preview(app: &App, name: &str, out: Option<&Path>) -> CliResult<()> {
    let payload = app
        .backend
        .preview(name)
        .await
        .context(BackendSnafu { stage: "preview" })?;
    let image = decode_preview(&payload.preview)?;

    let path = match out {
        Some(path) => path.to_path_buf(),
        None => default_preview_path(name),
    };
    write_output(&path, &image).await?;
    println!("{}", path.display());
    Ok(())
}

pub async fn delete(app: &App, name: &str) -> CliResult<()> {
    app.backend
        .delete(name)
        .await
        .context(BackendSnafu { stage: "delete" })?;
    println!("deleted {name}");
    Ok(())
}

fn default_preview_path(name: &str) -> PathBuf {
    let stem = Path::new(name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "preview".to_string());
    PathBuf::from(format!("{stem}_preview.png"))
}
