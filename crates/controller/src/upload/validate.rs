use std::collections::BTreeSet;
use std::path::Path;

use crate::attachments::AttachedFile;

/// Microscopy formats that rarely come with an `image/*` media type.
pub const MICROSCOPY_EXTENSIONS: [&str; 16] = [
    "tif", "tiff", "czi", "lsm", "nd2", "lif", "oib", "oif", "ims", "vsi", "ics", "ids", "dv",
    "stk", "lei", "zvi",
];

/// Decides which files may be uploaded.
///
/// A file qualifies if its declared media type is an image type or its extension is on the
/// allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePolicy {
    extensions: BTreeSet<String>,
}

impl Default for FilePolicy {
    fn default() -> Self {
        Self {
            extensions: MICROSCOPY_EXTENSIONS
                .iter()
                .map(|extension| extension.to_string())
                .collect(),
        }
    }
}

impl FilePolicy {
    pub fn with_extra_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions.extend(
            extensions
                .into_iter()
                .map(|extension| normalize_extension(extension.as_ref()))
                .filter(|extension| !extension.is_empty()),
        );
        self
    }

    pub fn is_supported(&self, file: &AttachedFile) -> bool {
        let image_type = file
            .media_type
            .as_deref()
            .is_some_and(|media_type| media_type.trim().to_ascii_lowercase().starts_with("image/"));
        if image_type {
            return true;
        }

        Path::new(&file.name)
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| {
                self.extensions
                    .contains(&normalize_extension(extension))
            })
    }

    /// Splits `files` into `(supported, unsupported)`, keeping their order.
    pub fn partition(&self, files: Vec<AttachedFile>) -> (Vec<AttachedFile>, Vec<AttachedFile>) {
        files.into_iter().partition(|file| self.is_supported(file))
    }
}

fn normalize_extension(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> AttachedFile {
        AttachedFile::new(name, vec![0_u8; 2])
    }

    #[test]
    fn image_media_type_or_microscopy_extension_qualifies() {
        let policy = FilePolicy::default();

        assert!(policy.is_supported(&named("photo").with_media_type("image/png")));
        assert!(policy.is_supported(&named("stack.CZI")));
        assert!(policy.is_supported(&named("plate.ome.tiff")));
        assert!(!policy.is_supported(&named("notes.txt").with_media_type("text/plain")));
        assert!(!policy.is_supported(&named("archive")));
    }

    #[test]
    fn extra_extensions_extend_the_allow_list() {
        let policy = FilePolicy::default().with_extra_extensions([".SVS", " ", "mrxs"]);

        assert!(policy.is_supported(&named("slide.svs")));
        assert!(policy.is_supported(&named("slide.mrxs")));
        assert!(!policy.is_supported(&named("slide.")));
    }

    #[test]
    fn partition_keeps_order() {
        let policy = FilePolicy::default();
        let (valid, invalid) = policy.partition(vec![
            named("b.tif"),
            named("x.doc"),
            named("a.png").with_media_type("image/png"),
        ]);

        let names = |files: &[AttachedFile]| {
            files
                .iter()
                .map(|file| file.name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&valid), vec!["b.tif", "a.png"]);
        assert_eq!(names(&invalid), vec!["x.doc"]);
    }
}
