#![deny(unsafe_code)]

pub mod attachments;
pub mod chat;
mod context;
mod error;
pub mod settings;
mod sink;
pub mod upload;

pub use context::SessionContext;
pub use error::{ControllerError, ControllerResult};
pub use sink::{ErrorReporter, PresentationSink, TracingSink};
