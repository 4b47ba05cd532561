use super::{AttachedFile, Attachment, AttachmentContext};

/// The presentation side of one attachment context: a native file-selection control and
/// the preview tiles next to it.
pub trait AttachmentSurface {
    /// Rebuilds the selection control so it holds exactly `files`, in order.
    fn sync_selection(&mut self, context: AttachmentContext, files: &[AttachedFile]);

    /// Shows (or re-renders) the preview tile for `attachment`.
    fn show_preview(&mut self, attachment: &Attachment);

    fn remove_preview(&mut self, context: AttachmentContext, file: &AttachedFile);
}
