mod orchestrator;
mod validate;

pub use orchestrator::{ArchiveRecord, UploadOrchestrator, UploadReport};
pub use validate::{FilePolicy, MICROSCOPY_EXTENSIONS};
