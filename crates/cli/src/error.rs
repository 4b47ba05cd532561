use std::path::PathBuf;

use atlas_backend::BackendError;
use atlas_controller::ControllerError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("{source}"))]
    Controller {
        stage: &'static str,
        source: ControllerError,
    },
    #[snafu(display("backend request failed on `{stage}`: {source}"))]
    Backend {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("failed to read {} on `{stage}`: {source}", path.display()))]
    ReadFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write {} on `{stage}`: {source}", path.display()))]
    WriteOutput {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("preview data is not valid base64: {source}"))]
    DecodePreview {
        stage: &'static str,
        source: base64::DecodeError,
    },
    #[snafu(display("failed to read from stdin: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("{details}"))]
    Usage {
        stage: &'static str,
        details: String,
    },
}

pub type CliResult<T> = Result<T, CliError>;
