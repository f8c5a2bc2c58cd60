use super::base_stream::BaseStream;
use super::catalog::Catalog;
use super::error::{PdfError, PdfResult};
use super::stream::MemoryStream;
use super::xref::XRef;
use log::warn;

/// Host-side knobs for opening a document.
#[derive(Debug, Clone, Default)]
pub struct DocumentOptions {
    /// Base URL that relative link targets resolve against.
    pub base_url: Option<String>,
}

/// Document host: locates the cross-reference data, drives parsing (with the
/// recovery retry and missing-data refetch loops) and exposes the catalog.
pub struct Document {
    catalog: Catalog,
}

impl Document {
    /// Opens a fully-resident document.
    pub fn open(data: Vec<u8>) -> PdfResult<Self> {
        Self::open_with(Box::new(MemoryStream::new(data)), DocumentOptions::default())
    }

    /// Opens a document over any byte store, progressive ones included. A
    /// `DataMissing` failure anywhere in parsing requests the range and
    /// retries; an unreadable cross-reference table triggers one recovery
    /// pass over the whole file.
    pub fn open_with(mut stream: Box<dyn BaseStream>, options: DocumentOptions) -> PdfResult<Self> {
        let start_xref = loop {
            match Self::find_start_xref(stream.as_ref()) {
                Ok(offset) => break offset,
                Err(PdfError::DataMissing { begin, end }) => {
                    stream.request_range(begin, end)?;
                }
                Err(e) => return Err(e),
            }
        };

        let mut xref = XRef::new(stream);
        xref.set_start_xref(start_xref);

        let mut recovering = false;
        loop {
            match xref.parse(recovering) {
                Ok(()) => break,
                Err(PdfError::DataMissing { begin, end }) => {
                    xref.request_range(begin, end)?;
                }
                Err(PdfError::XRefParse(message)) if !recovering => {
                    warn!("document: {}; retrying in recovery mode", message);
                    recovering = true;
                }
                Err(e) => return Err(e),
            }
        }

        let catalog = Catalog::new(xref, options.base_url)?;
        Ok(Document { catalog })
    }

    pub fn catalog(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn num_pages(&mut self) -> PdfResult<u32> {
        self.catalog.num_pages()
    }

    /// Scans the file tail for `startxref` and reads the offset after it.
    fn find_start_xref(stream: &dyn BaseStream) -> PdfResult<usize> {
        const KEYWORD: &[u8] = b"startxref";
        let length = stream.length();
        let tail_begin = length.saturating_sub(1024);
        let tail = stream.get_byte_range(tail_begin, length)?;

        let keyword_pos = tail
            .windows(KEYWORD.len())
            .rposition(|window| window == KEYWORD)
            .ok_or_else(|| PdfError::invalid_pdf("startxref keyword not found"))?;

        let mut pos = keyword_pos + KEYWORD.len();
        while pos < tail.len() && tail[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let digits_start = pos;
        while pos < tail.len() && tail[pos].is_ascii_digit() {
            pos += 1;
        }
        if digits_start == pos {
            return Err(PdfError::invalid_pdf("no offset after startxref"));
        }

        std::str::from_utf8(&tail[digits_start..pos])
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| PdfError::invalid_pdf("malformed startxref offset"))
    }
}
