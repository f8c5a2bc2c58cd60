pub mod core;

// Re-export main types for convenience
pub use core::{
    BaseStream, Catalog, ChunkedStream, Dest, Dict, Document, DocumentOptions, FileRangeLoader,
    MemoryStream, NameTree, NumberTree, ObjectLoader, OutlineItem, PdfError, PdfObject, PdfResult,
    PermissionFlags, Ref, ViewerPreferences, XRef, XRefEntry,
};
