//! Corrupt-input behavior: recovery scans, cycle guards and tolerated
//! structural damage.

mod common;

use common::{PdfBuilder, minimal_builder};
use pdf_graph::{Dest, Document, PdfError, PdfObject, Ref};

#[test]
fn recovers_from_bad_startxref_and_missing_endobj() {
    // Object 1 lost its endobj and the startxref offset points nowhere; the
    // document is still readable after the recovery scan.
    let data = b"%PDF-1.7\n\
        1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\n\
        2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n\
        3 0 obj\n<< /Type /Page /Parent 2 0 R >>\nendobj\n\
        trailer\n<< /Size 4 /Root 1 0 R >>\n\
        startxref\n99999\n%%EOF\n";

    let mut doc = Document::open(data.to_vec()).unwrap();
    assert_eq!(doc.num_pages().unwrap(), 1);

    // The truncated catalog still parses up to the start of object 2.
    let root = doc.catalog().xref_mut().fetch(Ref::new(1, 0)).unwrap();
    assert_eq!(
        root.as_dict().unwrap().get_raw("Type"),
        Some(&PdfObject::Name("Catalog".into()))
    );
}

#[test]
fn unrecoverable_garbage_is_invalid_pdf() {
    let data = b"%PDF-1.7\njust some bytes\nstartxref\n2\n%%EOF\n";
    let result = Document::open(data.to_vec());
    assert!(matches!(result, Err(PdfError::InvalidPdf(_))));
}

#[test]
fn outline_with_cyclic_sibling_chain_terminates() {
    let data = PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R /Outlines 20 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R >>")
        .object(20, "<< /Type /Outlines /First 21 0 R >>")
        .object(21, "<< /Title (One) /Parent 20 0 R /Next 22 0 R >>")
        .object(
            22,
            // Next points back at the first item.
            "<< /Title (Two) /Parent 20 0 R /Next 21 0 R >>",
        )
        .build(1);

    let mut doc = Document::open(data).unwrap();
    let outline = doc.catalog().document_outline().unwrap().unwrap();
    assert_eq!(outline.len(), 2);
    assert_eq!(outline[0].title, "One");
    assert_eq!(outline[1].title, "Two");
}

#[test]
fn name_tree_with_unsorted_leaf_still_resolves() {
    let data = PdfBuilder::new()
        .object(
            1,
            "<< /Type /Catalog /Pages 2 0 R /Names << /Dests 10 0 R >> >>",
        )
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R >>")
        // Keys out of order: binary search misses, the linear fallback hits.
        .object(10, "<< /Names [(b) [3 0 R /Fit] (a) [3 0 R /XYZ 0 0 0]] >>")
        .build(1);

    let mut doc = Document::open(data).unwrap();
    let dest = doc.catalog().get_destination("a").unwrap();
    assert!(matches!(dest, Some(Dest::Array(items)) if items.len() == 5));
}

#[test]
fn page_tree_cycle_is_an_error_not_a_hang() {
    let data = PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [2 0 R] /Count 1 >>")
        .build(1);

    let mut doc = Document::open(data).unwrap();
    assert!(matches!(
        doc.catalog().get_page_dict(0),
        Err(PdfError::Format(_))
    ));
}

#[test]
fn overly_deep_name_tree_is_treated_as_not_found() {
    let mut builder = PdfBuilder::new()
        .object(
            1,
            "<< /Type /Catalog /Pages 2 0 R /Names << /Dests 10 0 R >> >>",
        )
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R >>");

    // Twelve chained intermediate levels, deeper than the walker follows.
    for level in 0..12u32 {
        builder = builder.object(
            10 + level,
            format!(
                "<< /Kids [{} 0 R] /Limits [(a) (a)] >>",
                10 + level + 1
            ),
        );
    }
    let data = builder
        .object(22, "<< /Names [(a) [3 0 R /Fit]] /Limits [(a) (a)] >>")
        .build(1);

    let mut doc = Document::open(data).unwrap();
    assert_eq!(doc.catalog().get_destination("a").unwrap(), None);
}

#[test]
fn xref_entry_pointing_at_wrong_object_is_an_entry_error() {
    let mut data = minimal_builder().object(4, "(x)").build(1);

    // Redirect object 4's entry at object 1's header.
    let obj4_offset = data
        .windows(7)
        .position(|w| w == b"4 0 obj")
        .expect("object 4");
    let entry = format!("{:010} 00000 n", obj4_offset);
    let entry_pos = data
        .windows(entry.len())
        .position(|w| w == entry.as_bytes())
        .expect("entry line");
    let obj1_offset = data
        .windows(7)
        .position(|w| w == b"1 0 obj")
        .expect("object 1");
    let patched = format!("{:010} 00000 n", obj1_offset);
    data[entry_pos..entry_pos + patched.len()].copy_from_slice(patched.as_bytes());

    let mut doc = Document::open(data).unwrap();
    assert!(matches!(
        doc.catalog().xref_mut().fetch(Ref::new(4, 0)),
        Err(PdfError::XRefEntry(_))
    ));
}
