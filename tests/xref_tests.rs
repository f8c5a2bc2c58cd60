//! Cross-reference resolution tests over complete documents: classical
//! tables, cross-reference streams, object streams and incremental updates.

mod common;

use common::minimal_builder;
use pdf_graph::core::stream::MemoryStream;
use pdf_graph::{Document, PdfError, PdfObject, Ref, XRef, XRefEntry};
use std::rc::Rc;

#[test]
fn classical_table_end_to_end() {
    let data = minimal_builder()
        .object(4, "(a string)")
        .build(1);
    let mut doc = Document::open(data).unwrap();
    assert_eq!(doc.num_pages().unwrap(), 1);

    let xref = doc.catalog().xref_mut();
    assert!(xref.entry(0).unwrap().is_free());
    assert!(matches!(
        xref.entry(1),
        Some(XRefEntry::Uncompressed { .. })
    ));

    let obj = xref.fetch(Ref::new(4, 0)).unwrap();
    assert_eq!(*obj, PdfObject::String(b"a string".to_vec()));

    let trailer = xref.trailer().unwrap();
    assert_eq!(trailer.get_raw("Size"), Some(&PdfObject::Integer(5)));
}

#[test]
fn fetch_is_deterministic_within_session() {
    let data = minimal_builder().object(4, "[1 2 3]").build(1);
    let mut doc = Document::open(data).unwrap();
    let xref = doc.catalog().xref_mut();

    let first = xref.fetch(Ref::new(4, 0)).unwrap();
    let second = xref.fetch(Ref::new(4, 0)).unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(*first, *second);
}

#[test]
fn fetch_async_equals_fetch_on_resident_stream() {
    let data = minimal_builder().object(4, "<< /V 9 >>").build(1);
    let mut doc = Document::open(data).unwrap();
    let xref = doc.catalog().xref_mut();

    let sync = xref.fetch(Ref::new(4, 0)).unwrap();
    let asynchronous = xref.fetch_async(Ref::new(4, 0)).unwrap();
    assert_eq!(*sync, *asynchronous);
}

#[test]
fn generation_mismatch_is_an_entry_error() {
    let data = minimal_builder().build(1);
    let mut doc = Document::open(data).unwrap();
    let result = doc.catalog().xref_mut().fetch(Ref::new(3, 4));
    assert!(matches!(result, Err(PdfError::XRefEntry(_))));
}

#[test]
fn fetch_if_ref_is_identity_on_non_refs() {
    let data = minimal_builder().build(1);
    let mut doc = Document::open(data).unwrap();
    let xref = doc.catalog().xref_mut();

    let direct = PdfObject::Integer(12);
    assert_eq!(xref.fetch_if_ref(&direct).unwrap(), direct);

    let reference = PdfObject::Reference(Ref::new(2, 0));
    let resolved = xref.fetch_if_ref(&reference).unwrap();
    assert!(resolved.as_dict().is_some());
}

#[test]
fn incremental_update_newest_table_wins() {
    // Base document, then an appended update that replaces object 4 and
    // chains back with /Prev.
    let mut data = minimal_builder().object(4, "(old)").build(1);
    let base_xref = data
        .windows(4)
        .position(|w| w == b"xref")
        .expect("base xref");

    let update_obj_offset = data.len();
    data.extend_from_slice(b"4 0 obj\n(new)\nendobj\n");
    let update_xref_offset = data.len();
    data.extend_from_slice(
        format!(
            "xref\n4 1\n{:010} 00000 n \ntrailer\n<< /Size 5 /Root 1 0 R /Prev {} >>\nstartxref\n{}\n%%EOF\n",
            update_obj_offset, base_xref, update_xref_offset
        )
        .as_bytes(),
    );

    let mut doc = Document::open(data).unwrap();
    let obj = doc.catalog().xref_mut().fetch(Ref::new(4, 0)).unwrap();
    assert_eq!(*obj, PdfObject::String(b"new".to_vec()));
}

/// Builds a document indexed purely by a cross-reference stream, with two
/// objects compressed into an object stream (a stray `endobj` between the
/// members included).
fn xref_stream_document() -> Vec<u8> {
    let mut data = b"%PDF-1.7\n".to_vec();
    let mut offsets = [0usize; 8];

    offsets[1] = data.len();
    data.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R /Extra 5 0 R >>\nendobj\n");
    offsets[2] = data.len();
    data.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
    offsets[3] = data.len();
    data.extend_from_slice(b"3 0 obj\n<< /Type /Page /Parent 2 0 R >>\nendobj\n");

    // Object stream holding objects 5 and 6.
    let members = b"<< /A 5 >> endobj (hello)";
    let pairs = b"5 0 6 18\n";
    let mut payload = pairs.to_vec();
    payload.extend_from_slice(members);
    offsets[4] = data.len();
    data.extend_from_slice(
        format!(
            "4 0 obj\n<< /Type /ObjStm /N 2 /First {} /Length {} >>\nstream\n",
            pairs.len(),
            payload.len()
        )
        .as_bytes(),
    );
    data.extend_from_slice(&payload);
    data.extend_from_slice(b"\nendstream\nendobj\n");

    // Cross-reference stream: W [1 2 1], one entry per object 0..=7.
    offsets[7] = data.len();
    let mut entries = Vec::new();
    entries.extend_from_slice(&[0, 0, 0, 0]); // 0: free
    for num in 1..=4usize {
        entries.push(1);
        entries.extend_from_slice(&(offsets[num] as u16).to_be_bytes());
        entries.push(0);
    }
    entries.extend_from_slice(&[2, 0, 4, 0]); // 5: objstm 4, index 0
    entries.extend_from_slice(&[2, 0, 4, 1]); // 6: objstm 4, index 1
    entries.push(1);
    entries.extend_from_slice(&(offsets[7] as u16).to_be_bytes());
    entries.push(0); // 7: this stream

    data.extend_from_slice(
        format!(
            "7 0 obj\n<< /Type /XRef /W [1 2 1] /Index [0 8] /Size 8 /Root 1 0 R /Length {} >>\nstream\n",
            entries.len()
        )
        .as_bytes(),
    );
    data.extend_from_slice(&entries);
    data.extend_from_slice(b"\nendstream\nendobj\n");
    data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", offsets[7]).as_bytes());
    data
}

#[test]
fn xref_stream_and_object_stream() {
    let mut doc = Document::open(xref_stream_document()).unwrap();
    assert_eq!(doc.num_pages().unwrap(), 1);

    let xref = doc.catalog().xref_mut();
    assert_eq!(
        xref.entry(5),
        Some(&XRefEntry::Compressed {
            stream_num: 4,
            index: 0
        })
    );

    let member0 = xref.fetch(Ref::new(5, 0)).unwrap();
    let dict = member0.as_dict().expect("compressed dictionary member");
    assert_eq!(dict.get_raw("A"), Some(&PdfObject::Integer(5)));
    assert_eq!(dict.obj_id(), Some("5R"));

    // The stray endobj between members is tolerated.
    let member1 = xref.fetch(Ref::new(6, 0)).unwrap();
    assert_eq!(*member1, PdfObject::String(b"hello".to_vec()));
}

#[test]
fn compressed_members_prefetch_into_cache() {
    let mut doc = Document::open(xref_stream_document()).unwrap();
    let xref = doc.catalog().xref_mut();

    // Fetching one member parses the whole container; the sibling comes out
    // of the cache as the same allocation afterwards.
    let first = xref.fetch(Ref::new(6, 0)).unwrap();
    let again = xref.fetch(Ref::new(6, 0)).unwrap();
    assert!(Rc::ptr_eq(&first, &again));
}

#[test]
fn reparse_yields_identical_structures() {
    let data = minimal_builder().object(4, "(x)").build(1);

    let open = |bytes: Vec<u8>| {
        let mut xref = XRef::new(Box::new(MemoryStream::new(bytes)));
        let start = data
            .windows(9)
            .rposition(|w| w == b"startxref")
            .expect("startxref");
        // Offset digits follow the keyword and a newline.
        let digits: usize = std::str::from_utf8(&data[start + 10..])
            .unwrap()
            .lines()
            .next()
            .unwrap()
            .parse()
            .unwrap();
        xref.set_start_xref(digits);
        xref.parse(false).unwrap();
        xref
    };

    let mut a = open(data.clone());
    let mut b = open(data.clone());
    assert_eq!(a.trailer(), b.trailer());
    assert_eq!(a.catalog_dict(), b.catalog_dict());
    assert_eq!(a.num_entries(), b.num_entries());
    for num in 0..a.num_entries() as u32 {
        assert_eq!(a.entry(num), b.entry(num));
    }
    assert_eq!(
        *a.fetch(Ref::new(4, 0)).unwrap(),
        *b.fetch(Ref::new(4, 0)).unwrap()
    );
}
