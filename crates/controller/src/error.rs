use std::path::PathBuf;

use atlas_backend::{BackendError, StreamTarget};
use snafu::Snafu;

use crate::attachments::AttachmentContext;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ControllerError {
    #[snafu(display("{details}"))]
    Validation {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("'{name}' is not a supported image file"))]
    UnsupportedFile { stage: &'static str, name: String },
    #[snafu(display("none of the selected files are supported image files"))]
    NoSupportedFiles { stage: &'static str },
    #[snafu(display("a stream is already active ({active:?}); wait for it to finish"))]
    StreamBusy {
        stage: &'static str,
        active: StreamTarget,
    },
    #[snafu(display("request failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("unexpected response on `{stage}`: {details}"))]
    Protocol {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to write {} on `{stage}`, {source}", path.display()))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("no attachment surface wired for the {context} context"))]
    MissingSurface {
        stage: &'static str,
        context: AttachmentContext,
    },
}

impl ControllerError {
    /// Splits backend failures into transport and protocol problems.
    pub(crate) fn from_backend(stage: &'static str, source: BackendError) -> Self {
        if source.is_protocol() {
            Self::Protocol {
                stage,
                details: source.to_string(),
            }
        } else {
            Self::Transport { stage, source }
        }
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;
