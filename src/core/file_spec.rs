use super::error::PdfResult;
use super::primitives::{Dict, PdfObject, to_pdf_string};
use super::xref::XRef;
use log::warn;

/// Platform keys in lookup priority order, shared by the filename and the
/// embedded-content selection.
const PLATFORM_KEYS: [&str; 5] = ["UF", "F", "Unix", "Mac", "DOS"];

/// Serialized attachment: display name plus decoded content (empty for
/// unsupported spec shapes).
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content: Option<Vec<u8>>,
}

/// An embedded-file specification dictionary.
///
/// Only embedded files are supported: related-file trees (`/RF`) and specs
/// without `/EF` are reported and resolve to empty content.
pub struct FileSpec {
    root: Dict,
    content_available: bool,
}

impl FileSpec {
    pub fn new(root: Dict) -> Self {
        if root.has("RF") {
            warn!("file spec: related file specifications are not supported");
        }
        let content_available = root.has("EF");
        if !content_available {
            warn!("file spec: non-embedded file specifications are not supported");
        }
        FileSpec {
            root,
            content_available,
        }
    }

    /// Display filename with escaped and platform path separators
    /// normalized to forward slashes.
    pub fn filename(&self, xref: &mut XRef) -> PdfResult<String> {
        for key in PLATFORM_KEYS {
            if let Some(bytes) = self.root.get_string(xref, key)? {
                let name = to_pdf_string(&bytes)
                    .replace("\\\\", "\\")
                    .replace("\\/", "/")
                    .replace('\\', "/");
                return Ok(name);
            }
        }
        Ok("unnamed".to_string())
    }

    /// Decoded bytes of the embedded file stream, chosen from `/EF` with the
    /// same platform priority as the filename.
    pub fn content(&self, xref: &mut XRef) -> PdfResult<Option<Vec<u8>>> {
        if !self.content_available {
            return Ok(None);
        }
        let Some(ef) = self.root.get_dict(xref, "EF")? else {
            return Ok(None);
        };
        for key in PLATFORM_KEYS {
            if !ef.has(key) {
                continue;
            }
            return match ef.get(xref, key)? {
                Some(PdfObject::Stream(stream)) => Ok(Some(stream.decoded_bytes()?)),
                other => {
                    warn!(
                        "file spec: embedded content for /{} is missing or invalid: {:?}",
                        key, other
                    );
                    Ok(None)
                }
            };
        }
        Ok(None)
    }

    pub fn serializable(&self, xref: &mut XRef) -> PdfResult<Attachment> {
        Ok(Attachment {
            filename: self.filename(xref)?,
            content: self.content(xref)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::primitives::StreamObject;
    use crate::core::stream::MemoryStream;

    fn empty_xref() -> XRef {
        XRef::new(Box::new(MemoryStream::new(Vec::new())))
    }

    fn embedded(keys: Vec<(&str, &[u8])>, content_key: Option<&str>) -> Dict {
        let mut root = Dict::new();
        for (key, value) in keys {
            root.insert(key, PdfObject::String(value.to_vec()));
        }
        if let Some(key) = content_key {
            let mut ef = Dict::new();
            ef.insert(
                key,
                PdfObject::Stream(StreamObject::new(Dict::new(), b"payload".to_vec(), 0, 7)),
            );
            root.insert("EF", PdfObject::Dictionary(ef));
        }
        root
    }

    #[test]
    fn test_filename_priority_uf_over_f() {
        let spec = FileSpec::new(embedded(
            vec![("F", b"legacy.txt"), ("UF", b"unicode.txt")],
            Some("F"),
        ));
        assert_eq!(spec.filename(&mut empty_xref()).unwrap(), "unicode.txt");
    }

    #[test]
    fn test_filename_separator_normalization() {
        let spec = FileSpec::new(embedded(vec![("F", b"dir\\sub\\file.txt")], Some("F")));
        assert_eq!(
            spec.filename(&mut empty_xref()).unwrap(),
            "dir/sub/file.txt"
        );
    }

    #[test]
    fn test_filename_fallback() {
        let spec = FileSpec::new(embedded(vec![], Some("F")));
        assert_eq!(spec.filename(&mut empty_xref()).unwrap(), "unnamed");
    }

    #[test]
    fn test_content_from_embedded_stream() {
        let spec = FileSpec::new(embedded(vec![("F", b"a.txt")], Some("F")));
        assert_eq!(
            spec.content(&mut empty_xref()).unwrap(),
            Some(b"payload".to_vec())
        );
    }

    #[test]
    fn test_non_embedded_spec_has_no_content() {
        let spec = FileSpec::new(embedded(vec![("F", b"remote.txt")], None));
        assert_eq!(spec.content(&mut empty_xref()).unwrap(), None);
        let attachment = spec.serializable(&mut empty_xref()).unwrap();
        assert_eq!(attachment.filename, "remote.txt");
        assert_eq!(attachment.content, None);
    }
}
