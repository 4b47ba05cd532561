use std::path::{Path, PathBuf};

use atlas_controller::attachments::AttachedFile;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use snafu::ResultExt;

use crate::error::{CliResult, DecodePreviewSnafu, ReadFileSnafu, WriteOutputSnafu};

/// Reads `path` into an attachment, declaring the media type its extension implies.
pub async fn read_attachment(path: &Path) -> CliResult<AttachedFile> {
    let bytes = tokio::fs::read(path).await.context(ReadFileSnafu {
        stage: "read-attachment",
        path: path.to_path_buf(),
    })?;

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let file = AttachedFile::new(name, bytes);
    Ok(match mime_guess::from_path(path).first_raw() {
        Some(media_type) => file.with_media_type(media_type),
        None => file,
    })
}

pub async fn read_attachments(paths: &[PathBuf]) -> CliResult<Vec<AttachedFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(read_attachment(path).await?);
    }
    Ok(files)
}

pub async fn read_text(path: &Path) -> CliResult<String> {
    tokio::fs::read_to_string(path).await.context(ReadFileSnafu {
        stage: "read-text",
        path: path.to_path_buf(),
    })
}

pub async fn write_output(path: &Path, contents: &[u8]) -> CliResult<()> {
    tokio::fs::write(path, contents).await.context(WriteOutputSnafu {
        stage: "write-output",
        path: path.to_path_buf(),
    })
}

/// Decodes preview data, accepting both bare base64 and `data:` URLs.
pub fn decode_preview(encoded: &str) -> CliResult<Vec<u8>> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    STANDARD
        .decode(payload.trim())
        .context(DecodePreviewSnafu {
            stage: "decode-preview",
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previews_decode_from_data_urls_and_bare_base64() {
        assert_eq!(decode_preview("aGk=").expect("bare"), b"hi");
        assert_eq!(
            decode_preview("data:image/png;base64,aGk=").expect("data url"),
            b"hi"
        );
        assert!(decode_preview("not base64!").is_err());
    }

    #[tokio::test]
    async fn attachments_get_name_size_and_media_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Cells.PNG");
        std::fs::write(&path, [1_u8, 2, 3]).expect("write");

        let file = read_attachment(&path).await.expect("read");

        assert_eq!(file.name, "Cells.PNG");
        assert_eq!(file.size, 3);
        assert_eq!(file.media_type.as_deref(), Some("image/png"));

        let raw = dir.path().join("stack.czi");
        std::fs::write(&raw, [0_u8]).expect("write");
        assert_eq!(read_attachment(&raw).await.expect("read").media_type, None);
    }

    #[tokio::test]
    async fn less_common_image_formats_are_typed_as_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        let policy = atlas_controller::upload::FilePolicy::default();

        for name in ["cells.avif", "scan.jfif", "plate.svg", "frame.jp2"] {
            let path = dir.path().join(name);
            std::fs::write(&path, [0_u8]).expect("write");

            let file = read_attachment(&path).await.expect("read");
            let media_type = file.media_type.as_deref().unwrap_or_default();
            assert!(media_type.starts_with("image/"), "{name} typed as {media_type:?}");
            assert!(policy.is_supported(&file), "{name} rejected");
        }
    }
}
