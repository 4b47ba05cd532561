#![deny(unsafe_code)]

mod app;
mod chat;
mod commands;
mod error;
mod files;
mod terminal;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use app::App;
use error::CliResult;

/// Talks to an image-analysis assistant that writes ImageJ macros and runs them on
/// uploaded microscopy images.
#[derive(Debug, Parser)]
#[command(name = "atlas", version)]
struct Cli {
    /// Settings file to use instead of the per-user one.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a macro from a prompt and stream the answer.
    Generate {
        prompt: String,
        /// Improve the prompt first, then generate from the improved text.
        #[arg(long)]
        improve: bool,
        /// Save the finalized macro script to this file.
        #[arg(long, value_name = "PATH")]
        script_out: Option<PathBuf>,
    },
    /// Rewrite a prompt without generating anything.
    Improve { prompt: String },
    /// Upload images; with --execute the macro runs and the results archive is saved.
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, value_name = "SCRIPT_PATH")]
        execute: Option<PathBuf>,
        /// Directory for the results archive.
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// Download the preview image of an uploaded file.
    Preview {
        name: String,
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Delete an uploaded file from the server.
    Delete { name: String },
    /// Interactive session.
    Chat,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> CliResult<()> {
    let mut app = App::connect(cli.config)?;
    match cli.command {
        Command::Generate {
            prompt,
            improve,
            script_out,
        } => commands::generate(&mut app, &prompt, improve, script_out.as_deref()).await,
        Command::Improve { prompt } => commands::improve(&mut app, &prompt).await,
        Command::Upload {
            files,
            execute,
            out,
        } => commands::upload(&mut app, &files, execute.as_deref(), out.as_deref()).await,
        Command::Preview { name, out } => commands::preview(&app, &name, out.as_deref()).await,
        Command::Delete { name } => commands::delete(&app, &name).await,
        Command::Chat => chat::run(app).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_line_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn upload_requires_files() {
        assert!(Cli::try_parse_from(["atlas", "upload"]).is_err());

        let cli = Cli::try_parse_from([
            "atlas",
            "upload",
            "a.tif",
            "--execute",
            "macro.ijm",
            "--config",
            "atlas.json",
        ])
        .expect("valid upload");
        assert_eq!(cli.config, Some(PathBuf::from("atlas.json")));
        let Command::Upload { files, execute, .. } = cli.command else {
            panic!("expected upload");
        };
        assert_eq!(files, vec![PathBuf::from("a.tif")]);
        assert_eq!(execute, Some(PathBuf::from("macro.ijm")));
    }
}
