use thiserror::Error;

/// Universal error type for the object-graph layer.
///
/// The variants mirror the recovery contract of the resolver: `DataMissing`
/// is a resumable condition (request the byte range and retry), `XRefParse`
/// asks the caller to re-run parsing in recovery mode, `XRefEntry` flags an
/// entry/object mismatch, `Format` is a structural violation that optional
/// views downgrade to a logged `None`, and `InvalidPdf` is fatal.
#[derive(Debug, Clone, Error)]
pub enum PdfError {
    /// End of stream reached unexpectedly
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Bytes in `begin..end` have not been delivered yet; request the range
    /// and retry the failed operation.
    #[error("data missing in byte range {begin}..{end}")]
    DataMissing { begin: usize, end: usize },

    /// Invalid byte range requested from a stream
    #[error("invalid byte range {begin}..{end}")]
    InvalidRange { begin: usize, end: usize },

    /// Invalid stream position
    #[error("invalid position {pos} for stream of length {length}")]
    InvalidPosition { pos: usize, length: usize },

    /// Cross-reference entry does not match the object it points at
    #[error("cross-reference entry error: {0}")]
    XRefEntry(String),

    /// Cross-reference data unreadable in normal mode; retry with recovery
    #[error("cross-reference parse error: {0}")]
    XRefParse(String),

    /// Structural violation of the PDF format
    #[error("format error: {0}")]
    Format(String),

    /// Recovery produced no usable document structure
    #[error("invalid PDF: {0}")]
    InvalidPdf(String),

    /// I/O failure in a byte-range loader
    #[error("I/O error: {0}")]
    Io(String),

    /// Anything else
    #[error("{0}")]
    Generic(String),
}

impl PdfError {
    pub fn data_missing(begin: usize, end: usize) -> Self {
        PdfError::DataMissing { begin, end }
    }

    pub fn xref_entry<S: Into<String>>(message: S) -> Self {
        PdfError::XRefEntry(message.into())
    }

    pub fn xref_parse<S: Into<String>>(message: S) -> Self {
        PdfError::XRefParse(message.into())
    }

    pub fn format<S: Into<String>>(message: S) -> Self {
        PdfError::Format(message.into())
    }

    pub fn invalid_pdf<S: Into<String>>(message: S) -> Self {
        PdfError::InvalidPdf(message.into())
    }

    /// True for the resumable missing-bytes condition. Optional catalog views
    /// swallow format errors but must always re-raise this one.
    pub fn is_data_missing(&self) -> bool {
        matches!(self, PdfError::DataMissing { .. })
    }
}

/// Result type alias for the crate
pub type PdfResult<T> = Result<T, PdfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = PdfError::data_missing(100, 150);
        assert_eq!(format!("{}", err), "data missing in byte range 100..150");

        let err = PdfError::xref_entry("generation mismatch");
        assert_eq!(
            format!("{}", err),
            "cross-reference entry error: generation mismatch"
        );
    }

    #[test]
    fn test_is_data_missing() {
        assert!(PdfError::data_missing(0, 1).is_data_missing());
        assert!(!PdfError::format("bad dict").is_data_missing());
        assert!(!PdfError::UnexpectedEof.is_data_missing());
    }
}
