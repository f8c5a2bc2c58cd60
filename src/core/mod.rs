pub mod base_stream;
pub mod catalog;
pub mod chunked_stream;
pub mod crypto;
pub mod decode;
pub mod destination;
pub mod document;
pub mod error;
pub mod file_spec;
pub mod lexer;
pub mod name_tree;
pub mod object_loader;
pub mod parser;
pub mod primitives;
pub mod stream;
pub mod xref;

pub use base_stream::BaseStream;
pub use catalog::{Catalog, OutlineItem, PermissionFlags, ViewerPreferences};
pub use chunked_stream::{ChunkedStream, FileRangeLoader, MemoryRangeLoader, RangeLoader};
pub use crypto::{CipherTransform, CipherTransformFactory};
pub use destination::{Dest, ParsedDestination};
pub use document::{Document, DocumentOptions};
pub use error::{PdfError, PdfResult};
pub use file_spec::{Attachment, FileSpec};
pub use lexer::{Lexer, Token};
pub use name_tree::{NameTree, NumberTree};
pub use object_loader::ObjectLoader;
pub use parser::Parser;
pub use primitives::{Dict, PdfObject, Ref, StreamObject, to_pdf_string};
pub use stream::MemoryStream;
pub use xref::{DocStats, XRef, XRefEntry};
