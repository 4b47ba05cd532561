mod deletion;
mod registry;
mod surface;

use std::fmt;

use atlas_backend::UploadFile;
use bytes::Bytes;

pub use deletion::{DeletionQueue, DeletionRequest, deletion_channel, run_deletion_worker};
pub use registry::{AddOutcome, AttachmentRegistry, AttachmentRegistryBuilder};
pub use surface::AttachmentSurface;

#[cfg(test)]
pub(crate) use registry::tests as test_support;

/// The two independent places files can be attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttachmentContext {
    /// Files selected for batch preview or macro execution.
    Batch,
    /// Files attached to the chat conversation.
    Conversational,
}

impl AttachmentContext {
    pub const ALL: [Self; 2] = [Self::Batch, Self::Conversational];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Conversational => "conversational",
        }
    }
}

impl fmt::Display for AttachmentContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Identity used for de-duplication and removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentKey {
    pub name: String,
    pub size: u64,
}

impl fmt::Display for AttachmentKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} ({} bytes)", self.name, self.size)
    }
}

/// A file the user selected, with its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedFile {
    pub name: String,
    pub size: u64,
    pub media_type: Option<String>,
    pub bytes: Bytes,
}

impl AttachedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            media_type: None,
            bytes,
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn key(&self) -> AttachmentKey {
        AttachmentKey {
            name: self.name.clone(),
            size: self.size,
        }
    }

    pub fn same_identity(&self, other: &AttachedFile) -> bool {
        self.name == other.name && self.size == other.size
    }

    pub fn to_upload_file(&self) -> UploadFile {
        let file = UploadFile::new(self.name.clone(), self.bytes.clone());
        match &self.media_type {
            Some(media_type) => file.with_media_type(media_type.clone()),
            None => file,
        }
    }
}

/// What the surface shows as an attachment's thumbnail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PreviewReference {
    /// No server preview yet.
    #[default]
    Pending,
    /// Encoded image data as returned by the backend.
    Encoded(String),
}

impl PreviewReference {
    pub fn encoded(&self) -> Option<&str> {
        match self {
            Self::Pending => None,
            Self::Encoded(data) => Some(data),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file: AttachedFile,
    pub context: AttachmentContext,
    /// Storage name assigned by the backend once the file was uploaded.
    pub server_id: Option<String>,
    pub preview: PreviewReference,
}

impl Attachment {
    pub fn new(file: AttachedFile, context: AttachmentContext, preview: PreviewReference) -> Self {
        Self {
            file,
            context,
            server_id: None,
            preview,
        }
    }

    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    pub fn key(&self) -> AttachmentKey {
        self.file.key()
    }

    /// The identifier the backend knows this file by.
    pub fn remote_identifier(&self) -> &str {
        self.server_id.as_deref().unwrap_or(&self.file.name)
    }
}
