//! Line-oriented interactive session.

use std::io::Stdout;
use std::path::{Path, PathBuf};

use atlas_controller::attachments::{
    AttachmentContext, AttachmentKey, AttachmentRegistry, PreviewReference,
};
use atlas_controller::chat::{SessionController, StreamOutcome};
use atlas_controller::upload::{UploadOrchestrator, UploadReport};
use atlas_controller::{ControllerError, ErrorReporter, SessionContext};
use snafu::ResultExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::app::{App, drain_deletions};
use crate::error::{CliResult, ReadInputSnafu};
use crate::files::{read_attachments, read_text};
use crate::terminal::{StderrReporter, TerminalSink};

const HELP: &str = "\
commands:
  <text>              submit a prompt (empty line sends a pending improved prompt)
  :improve            toggle prompt improvement before generation
  :attach FILE...     upload files into the conversation
  :batch FILE...      add files to the batch selection
  :upload [SCRIPT]    upload the batch; with a script (or @path) it is executed
  :preview NAME       refresh the preview of an attached file
  :remove NAME        remove a file from either selection
  :list               show both selections
  :quit               leave";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChatCommand {
    Prompt(String),
    SendPending,
    ToggleImprove,
    Attach(Vec<PathBuf>),
    Batch(Vec<PathBuf>),
    Upload(Option<String>),
    Preview(String),
    Remove(String),
    List,
    Quit,
    Help,
}

impl ChatCommand {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(command) = line.strip_prefix(':') else {
            return if line.is_empty() {
                Self::SendPending
            } else {
                Self::Prompt(line.to_string())
            };
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map(|(name, rest)| (name, rest.trim()))
            .unwrap_or((command, ""));
        let paths = || rest.split_whitespace().map(PathBuf::from).collect();

        match name {
            "improve" => Self::ToggleImprove,
            "attach" if !rest.is_empty() => Self::Attach(paths()),
            "batch" if !rest.is_empty() => Self::Batch(paths()),
            "upload" => Self::Upload((!rest.is_empty()).then(|| rest.to_string())),
            "preview" if !rest.is_empty() => Self::Preview(rest.to_string()),
            "remove" if !rest.is_empty() => Self::Remove(rest.to_string()),
            "list" => Self::List,
            "quit" | "exit" => Self::Quit,
            _ => Self::Help,
        }
    }
}

struct ChatSession {
    ctx: SessionContext,
    controller: SessionController,
    orchestrator: UploadOrchestrator,
    registry: AttachmentRegistry,
    sink: TerminalSink<Stdout>,
    errors: StderrReporter,
    improve_next: bool,
    pending_prompt: Option<String>,
    download_dir: PathBuf,
}

impl ChatSession {
    async fn handle(&mut self, command: ChatCommand) -> CliResult<bool> {
        match command {
            ChatCommand::Prompt(text) => {
                if self.pending_prompt.take().is_some() {
                    // The user rewrote the prompt instead of sending the improved one.
                    self.ctx.reset_improvement();
                }
                self.submit(&text).await;
            }
            ChatCommand::SendPending => {
                if let Some(prompt) = self.pending_prompt.take() {
                    self.submit(&prompt).await;
                }
            }
            ChatCommand::ToggleImprove => {
                self.improve_next = !self.improve_next;
                eprintln!(
                    "prompt improvement {}",
                    if self.improve_next { "on" } else { "off" }
                );
            }
            ChatCommand::Attach(paths) => {
                let files = read_attachments(&paths).await?;
                let result = self
                    .orchestrator
                    .submit(
                        &mut self.ctx,
                        &mut self.registry,
                        AttachmentContext::Conversational,
                        files,
                        false,
                        None,
                        &mut self.errors,
                    )
                    .await;
                self.report_upload(result).await;
            }
            ChatCommand::Batch(paths) => {
                for file in read_attachments(&paths).await? {
                    self.registry
                        .add(file, PreviewReference::Pending, AttachmentContext::Batch);
                }
            }
            ChatCommand::Upload(script) => {
                let script = match script {
                    Some(text) => match text.strip_prefix('@') {
                        Some(path) => Some(read_text(Path::new(path)).await?),
                        None => Some(text),
                    },
                    None => None,
                };
                let files = self.registry.files(AttachmentContext::Batch);
                let result = self
                    .orchestrator
                    .submit(
                        &mut self.ctx,
                        &mut self.registry,
                        AttachmentContext::Batch,
                        files,
                        script.is_some(),
                        script.as_deref(),
                        &mut self.errors,
                    )
                    .await;
                self.report_upload(result).await;
            }
            ChatCommand::Preview(name) => {
                let Some((context, key)) = self.locate(&name) else {
                    self.errors.report_error(&format!("'{name}' is not attached"));
                    return Ok(true);
                };
                if let Err(error) = self
                    .orchestrator
                    .refresh_preview(&mut self.registry, context, &key)
                    .await
                {
                    self.errors.report_error(&error.to_string());
                }
            }
            ChatCommand::Remove(name) => {
                let Some((context, key)) = self.locate(&name) else {
                    self.errors.report_error(&format!("'{name}' is not attached"));
                    return Ok(true);
                };
                let file = self
                    .registry
                    .get(context, &key)
                    .map(|attachment| attachment.file.clone());
                if let Some(file) = file {
                    self.registry.remove(&file, context);
                }
            }
            ChatCommand::List => self.list(),
            ChatCommand::Help => eprintln!("{HELP}"),
            ChatCommand::Quit => return Ok(false),
        }
        Ok(true)
    }

    async fn submit(&mut self, text: &str) {
        if let Err(error) =
            self.controller
                .submit_turn(&mut self.ctx, text, self.improve_next, &mut self.sink)
        {
            self.errors.report_error(&error.to_string());
            return;
        }

        let outcome = tokio::select! {
            outcome = self.controller.run_active_stream(&mut self.ctx, &mut self.sink, &mut self.errors) => outcome,
            _ = tokio::signal::ctrl_c() => None,
        };
        match outcome.or_else(|| self.controller.cancel_active_stream(&mut self.ctx)) {
            Some(StreamOutcome::Improved { prompt }) => {
                eprintln!("press enter to send the improved prompt, or type a new one");
                self.pending_prompt = Some(prompt);
            }
            Some(StreamOutcome::Cancelled { .. }) => eprintln!("cancelled"),
            _ => {}
        }
    }

    async fn report_upload(&mut self, result: Result<UploadReport, ControllerError>) {
        match result {
            Ok(UploadReport::Archive(record)) => {
                match record.save_into(&self.download_dir).await {
                    Ok(path) => println!("{}: {}", record.label, path.display()),
                    Err(error) => self.errors.report_error(&error.to_string()),
                }
            }
            Ok(UploadReport::Previews { context, outcomes }) => {
                eprintln!("[{context}] {} file(s) ready", outcomes.len());
            }
            Err(error) => self.errors.report_error(&error.to_string()),
        }
    }

    fn locate(&self, name: &str) -> Option<(AttachmentContext, AttachmentKey)> {
        AttachmentContext::ALL.into_iter().find_map(|context| {
            self.registry
                .find_by_name(context, name)
                .map(|attachment| (context, attachment.key()))
        })
    }

    fn list(&self) {
        for context in AttachmentContext::ALL {
            let attachments = self.registry.list_by_context(context);
            println!("{context}: {} file(s)", attachments.len());
            for attachment in attachments {
                println!(
                    "  {} ({} bytes) -> {}",
                    attachment.file.name,
                    attachment.file.size,
                    attachment.remote_identifier()
                );
            }
        }
        for record in self.orchestrator.results() {
            println!("{} ({} bytes)", record.label, record.archive.len());
        }
    }
}

pub async fn run(app: App) -> CliResult<()> {
    let (registry, worker) = app.attachment_registry()?;
    let mut session = ChatSession {
        controller: app.session_controller(),
        orchestrator: app.upload_orchestrator(),
        registry,
        sink: TerminalSink::new(std::io::stdout()),
        errors: StderrReporter::default(),
        improve_next: false,
        pending_prompt: None,
        download_dir: app.settings.download_dir(),
        ctx: app.ctx,
    };

    eprintln!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let result: CliResult<()> = async {
        while let Some(line) = lines.next_line().await.context(ReadInputSnafu {
            stage: "read-chat-line",
        })? {
            if !session.handle(ChatCommand::parse(&line)).await? {
                break;
            }
        }
        Ok(())
    }
    .await;

    tracing::debug!(reported = session.errors.reported(), "chat ended");
    drain_deletions(session.registry, worker).await;
    result
}
