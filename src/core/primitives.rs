use super::decode;
use super::error::PdfResult;
use super::xref::XRef;
use indexmap::IndexMap;
use std::fmt;

/// Indirect object reference: `(object number, generation)`.
///
/// Two refs are equal iff both fields match; being `Copy` with structural
/// equality, no interning is needed for cheap comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ref {
    pub num: u32,
    pub generation: u16,
}

impl Ref {
    pub fn new(num: u32, generation: u16) -> Self {
        Ref { num, generation }
    }

    /// Textual id used for diagnostics and per-node caches, e.g. `12R` or
    /// `12R3` for a nonzero generation.
    pub fn obj_id(&self) -> String {
        if self.generation == 0 {
            format!("{}R", self.num)
        } else {
            format!("{}R{}", self.num, self.generation)
        }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.num, self.generation)
    }
}

/// Dictionary: name-keyed mapping preserving insertion order.
///
/// Values are stored raw; `get` resolves a stored reference through the
/// cross-reference table while `get_raw` hands it back as-is. A dictionary
/// that came from an indirect object carries that object's textual id.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    map: IndexMap<String, PdfObject>,
    obj_id: Option<String>,
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

impl Dict {
    pub fn new() -> Self {
        Dict::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: PdfObject) {
        self.map.insert(key.into(), value);
    }

    pub fn get_raw(&self, key: &str) -> Option<&PdfObject> {
        self.map.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PdfObject)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &PdfObject> {
        self.map.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut PdfObject> {
        self.map.values_mut()
    }

    pub fn obj_id(&self) -> Option<&str> {
        self.obj_id.as_deref()
    }

    pub fn set_obj_id(&mut self, id: String) {
        self.obj_id = Some(id);
    }

    /// Resolved access: a stored `Reference` is fetched through the xref.
    pub fn get(&self, xref: &mut XRef, key: &str) -> PdfResult<Option<PdfObject>> {
        match self.map.get(key) {
            None => Ok(None),
            Some(PdfObject::Reference(r)) => Ok(Some((*xref.fetch(*r)?).clone())),
            Some(value) => Ok(Some(value.clone())),
        }
    }

    pub fn get_i64(&self, xref: &mut XRef, key: &str) -> PdfResult<Option<i64>> {
        Ok(self.get(xref, key)?.as_ref().and_then(PdfObject::as_i64))
    }

    pub fn get_f64(&self, xref: &mut XRef, key: &str) -> PdfResult<Option<f64>> {
        Ok(self.get(xref, key)?.as_ref().and_then(PdfObject::as_f64))
    }

    pub fn get_bool(&self, xref: &mut XRef, key: &str) -> PdfResult<Option<bool>> {
        Ok(match self.get(xref, key)? {
            Some(PdfObject::Boolean(b)) => Some(b),
            _ => None,
        })
    }

    pub fn get_name(&self, xref: &mut XRef, key: &str) -> PdfResult<Option<String>> {
        Ok(match self.get(xref, key)? {
            Some(PdfObject::Name(name)) => Some(name),
            _ => None,
        })
    }

    pub fn get_string(&self, xref: &mut XRef, key: &str) -> PdfResult<Option<Vec<u8>>> {
        Ok(match self.get(xref, key)? {
            Some(PdfObject::String(bytes)) => Some(bytes),
            _ => None,
        })
    }

    pub fn get_array(&self, xref: &mut XRef, key: &str) -> PdfResult<Option<Vec<PdfObject>>> {
        Ok(match self.get(xref, key)? {
            Some(PdfObject::Array(items)) => Some(items),
            _ => None,
        })
    }

    pub fn get_dict(&self, xref: &mut XRef, key: &str) -> PdfResult<Option<Dict>> {
        Ok(match self.get(xref, key)? {
            Some(PdfObject::Dictionary(dict)) => Some(dict),
            _ => None,
        })
    }
}

/// Stream object: a dictionary plus its raw (still-encoded) payload and the
/// byte range it was read from.
#[derive(Debug, Clone)]
pub struct StreamObject {
    pub dict: Dict,
    data: Vec<u8>,
    pub start: usize,
    pub end: usize,
}

impl PartialEq for StreamObject {
    fn eq(&self, other: &Self) -> bool {
        self.dict == other.dict && self.data == other.data
    }
}

impl StreamObject {
    pub fn new(dict: Dict, data: Vec<u8>, start: usize, end: usize) -> Self {
        StreamObject {
            dict,
            data,
            start,
            end,
        }
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Applies the dictionary's `Filter`/`DecodeParms` to the payload.
    pub fn decoded_bytes(&self) -> PdfResult<Vec<u8>> {
        decode::decode_stream_data(&self.dict, &self.data)
    }

    pub(crate) fn replace_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }
}

/// The sum type of PDF values.
#[derive(Debug, Clone, PartialEq)]
pub enum PdfObject {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    /// Raw string bytes; text strings are decoded lazily via `to_pdf_string`.
    String(Vec<u8>),
    Name(String),
    Array(Vec<PdfObject>),
    Dictionary(Dict),
    Stream(StreamObject),
    Reference(Ref),
    /// Parser-control token (`obj`, `endobj`, `stream`, `trailer`, ...).
    Command(String),
}

impl PdfObject {
    pub fn is_null(&self) -> bool {
        matches!(self, PdfObject::Null)
    }

    pub fn is_command(&self, cmd: &str) -> bool {
        matches!(self, PdfObject::Command(c) if c == cmd)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PdfObject::Integer(i) => Some(*i),
            PdfObject::Real(r) if r.fract() == 0.0 => Some(*r as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PdfObject::Integer(i) => Some(*i as f64),
            PdfObject::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PdfObject::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            PdfObject::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_string_bytes(&self) -> Option<&[u8]> {
        match self {
            PdfObject::String(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PdfObject]> {
        match self {
            PdfObject::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            PdfObject::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&StreamObject> {
        match self {
            PdfObject::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<Ref> {
        match self {
            PdfObject::Reference(r) => Some(*r),
            _ => None,
        }
    }
}

/// Decodes a PDF text string: UTF-16BE/LE and UTF-8 byte order marks, with a
/// byte-wise fallback for PDFDocEncoding (approximated as Latin-1).
pub fn to_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        return decode_utf16(&bytes[2..], u16::from_be_bytes);
    }
    if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xFE {
        return decode_utf16(&bytes[2..], u16::from_le_bytes);
    }
    if bytes.len() >= 3 && bytes[..3] == [0xEF, 0xBB, 0xBF] {
        return String::from_utf8_lossy(&bytes[3..]).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

fn decode_utf16(bytes: &[u8], from_bytes: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| from_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_equality_and_id() {
        assert_eq!(Ref::new(5, 0), Ref::new(5, 0));
        assert_ne!(Ref::new(5, 0), Ref::new(5, 1));
        assert_eq!(Ref::new(5, 0).obj_id(), "5R");
        assert_eq!(Ref::new(5, 2).obj_id(), "5R2");
        assert_eq!(Ref::new(5, 2).to_string(), "5 2 R");
    }

    #[test]
    fn test_dict_preserves_insertion_order() {
        let mut dict = Dict::new();
        dict.insert("Zebra", PdfObject::Integer(1));
        dict.insert("Alpha", PdfObject::Integer(2));
        dict.insert("Mid", PdfObject::Integer(3));
        let keys: Vec<&str> = dict.keys().collect();
        assert_eq!(keys, vec!["Zebra", "Alpha", "Mid"]);
    }

    #[test]
    fn test_dict_equality_ignores_obj_id() {
        let mut a = Dict::new();
        a.insert("K", PdfObject::Null);
        let mut b = a.clone();
        b.set_obj_id("7R".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn test_numeric_coercions() {
        assert_eq!(PdfObject::Integer(7).as_i64(), Some(7));
        assert_eq!(PdfObject::Real(7.0).as_i64(), Some(7));
        assert_eq!(PdfObject::Real(7.5).as_i64(), None);
        assert_eq!(PdfObject::Integer(7).as_f64(), Some(7.0));
        assert_eq!(PdfObject::Name("7".into()).as_i64(), None);
    }

    #[test]
    fn test_pdf_string_decoding() {
        assert_eq!(to_pdf_string(b"plain"), "plain");
        // UTF-16BE with BOM
        assert_eq!(to_pdf_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0x42]), "AB");
        // UTF-16LE with BOM
        assert_eq!(to_pdf_string(&[0xFF, 0xFE, 0x41, 0x00]), "A");
        // UTF-8 BOM
        assert_eq!(to_pdf_string(&[0xEF, 0xBB, 0xBF, b'h', b'i']), "hi");
        // Latin-1 fallback
        assert_eq!(to_pdf_string(&[0xE9]), "\u{e9}");
    }
}
