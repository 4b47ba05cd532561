use std::collections::HashMap;

use snafu::OptionExt;

use super::{
    AttachedFile, Attachment, AttachmentContext, AttachmentKey, AttachmentSurface, DeletionQueue,
    DeletionRequest, PreviewReference,
};
use crate::error::{ControllerResult, MissingSurfaceSnafu};

/// What `add`/`insert` did with the incoming file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Appended { index: usize },
    /// A file with the same name and size was already attached; it was updated in place.
    Replaced { index: usize },
}

impl AddOutcome {
    pub fn index(self) -> usize {
        match self {
            Self::Appended { index } | Self::Replaced { index } => index,
        }
    }
}

/// Wires one surface per context. Building fails if any context has none.
pub struct AttachmentRegistryBuilder {
    deletions: DeletionQueue,
    surfaces: HashMap<AttachmentContext, Box<dyn AttachmentSurface>>,
}

impl AttachmentRegistryBuilder {
    pub fn with_surface(
        mut self,
        context: AttachmentContext,
        surface: Box<dyn AttachmentSurface>,
    ) -> Self {
        self.surfaces.insert(context, surface);
        self
    }

    pub fn build(mut self) -> ControllerResult<AttachmentRegistry> {
        let mut surfaces = HashMap::with_capacity(AttachmentContext::ALL.len());
        for context in AttachmentContext::ALL {
            let surface = self.surfaces.remove(&context).context(MissingSurfaceSnafu {
                stage: "build-attachment-registry",
                context,
            })?;
            surfaces.insert(context, surface);
        }

        Ok(AttachmentRegistry {
            sets: HashMap::new(),
            surfaces,
            deletions: self.deletions,
        })
    }
}

/// Canonical ordered attachment sets, one per context, mirrored into their surfaces.
///
/// No two entries of one context share a name and size.
pub struct AttachmentRegistry {
    sets: HashMap<AttachmentContext, Vec<Attachment>>,
    surfaces: HashMap<AttachmentContext, Box<dyn AttachmentSurface>>,
    deletions: DeletionQueue,
}

impl AttachmentRegistry {
    pub fn builder(deletions: DeletionQueue) -> AttachmentRegistryBuilder {
        AttachmentRegistryBuilder {
            deletions,
            surfaces: HashMap::new(),
        }
    }

    /// Attaches a locally selected file.
    pub fn add(
        &mut self,
        file: AttachedFile,
        preview: PreviewReference,
        context: AttachmentContext,
    ) -> AddOutcome {
        self.insert(Attachment::new(file, context, preview))
    }

    /// Attaches a fully described attachment, merging with an existing `(name, size)` entry.
    pub fn insert(&mut self, attachment: Attachment) -> AddOutcome {
        let context = attachment.context;
        let set = self.sets.entry(context).or_default();

        let outcome = match set
            .iter()
            .position(|existing| existing.file.same_identity(&attachment.file))
        {
            Some(index) => {
                let existing = &mut set[index];
                let mut replacement = attachment;
                match existing.server_id.take() {
                    Some(known) if replacement.server_id.is_none() => {
                        replacement.server_id = Some(known);
                    }
                    Some(stale) if replacement.server_id.as_deref() != Some(stale.as_str()) => {
                        // The old upload is no longer referenced by anything.
                        self.deletions.enqueue(DeletionRequest {
                            context,
                            identifier: stale,
                        });
                    }
                    _ => {}
                }
                *existing = replacement;
                AddOutcome::Replaced { index }
            }
            None => {
                set.push(attachment);
                AddOutcome::Appended {
                    index: set.len() - 1,
                }
            }
        };

        let index = outcome.index();
        tracing::debug!(context = %context, index, outcome = ?outcome, "attachment added");
        if let (Some(set), Some(surface)) = (self.sets.get(&context), self.surfaces.get_mut(&context))
        {
            surface.show_preview(&set[index]);
            surface.sync_selection(context, &files_of(set));
        }
        outcome
    }

    /// Removes every entry matching `file`'s name and size, resyncs the selection control
    /// and queues backend deletion for each removed entry.
    pub fn remove(&mut self, file: &AttachedFile, context: AttachmentContext) -> usize {
        let Some(set) = self.sets.get_mut(&context) else {
            return 0;
        };

        let (removed, kept): (Vec<Attachment>, Vec<Attachment>) = std::mem::take(set)
            .into_iter()
            .partition(|attachment| attachment.file.same_identity(file));
        *set = kept;

        if removed.is_empty() {
            return 0;
        }

        let remaining = files_of(set);
        if let Some(surface) = self.surfaces.get_mut(&context) {
            for attachment in &removed {
                surface.remove_preview(context, &attachment.file);
            }
            surface.sync_selection(context, &remaining);
        }

        for attachment in &removed {
            self.deletions.enqueue(DeletionRequest {
                context,
                identifier: attachment.remote_identifier().to_string(),
            });
        }

        tracing::info!(context = %context, file = %file.name, removed = removed.len(), "attachment removed");
        removed.len()
    }

    pub fn list_by_context(&self, context: AttachmentContext) -> &[Attachment] {
        self.sets.get(&context).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn files(&self, context: AttachmentContext) -> Vec<AttachedFile> {
        files_of(self.list_by_context(context))
    }

    pub fn get(&self, context: AttachmentContext, key: &AttachmentKey) -> Option<&Attachment> {
        self.list_by_context(context)
            .iter()
            .find(|attachment| attachment.file.name == key.name && attachment.file.size == key.size)
    }

    /// First attachment with `name`, for callers that only know the file name.
    pub fn find_by_name(&self, context: AttachmentContext, name: &str) -> Option<&Attachment> {
        self.list_by_context(context)
            .iter()
            .find(|attachment| attachment.file.name == name)
    }

    /// Replaces the preview of the attachment identified by `key` and re-renders it.
    pub fn update_preview(
        &mut self,
        context: AttachmentContext,
        key: &AttachmentKey,
        preview: PreviewReference,
    ) -> bool {
        let Some(attachment) = self.sets.get_mut(&context).and_then(|set| {
            set.iter_mut().find(|attachment| {
                attachment.file.name == key.name && attachment.file.size == key.size
            })
        }) else {
            return false;
        };

        attachment.preview = preview;
        if let Some(surface) = self.surfaces.get_mut(&context) {
            surface.show_preview(attachment);
        }
        true
    }
}

fn files_of(set: &[Attachment]) -> Vec<AttachedFile> {
    set.iter().map(|attachment| attachment.file.clone()).collect()
}
