//! Catalog view tests over a document exercising the page tree, outline,
//! destinations, labels, viewer preferences, attachments and permissions.

mod common;

use common::PdfBuilder;
use pdf_graph::{Dest, Document, PdfObject, PermissionFlags, Ref};

/// A five-page document with a two-level page tree and every optional
/// catalog view populated.
fn rich_document() -> Document {
    let data = PdfBuilder::new()
        .object(
            1,
            "<< /Type /Catalog /Pages 2 0 R \
             /PageLayout /TwoColumnLeft \
             /PageMode /UseOutlines \
             /PageLabels << /Nums [0 << /S /r /P (A-) >> 3 << /S /D /St 1 >>] >> \
             /Names << /Dests 10 0 R /EmbeddedFiles 12 0 R /JavaScript 14 0 R >> \
             /Dests 16 0 R \
             /Outlines 20 0 R \
             /ViewerPreferences << /HideToolbar true /Direction /R2L /Duplex /Simplex \
                /PrintPageRange [1 2 2 5] /NumCopies 2 \
                /NonFullScreenPageMode /Bogus /FitWindow /NotBool >> \
             /OpenAction << /S /Named /N /Print >> \
             /Metadata 18 0 R >>",
        )
        .object(2, "<< /Type /Pages /Kids [4 0 R 5 0 R] /Count 5 >>")
        .object(
            4,
            "<< /Type /Pages /Parent 2 0 R /Kids [6 0 R 7 0 R] /Count 2 >>",
        )
        .object(
            5,
            "<< /Type /Pages /Parent 2 0 R /Kids [8 0 R 9 0 R 3 0 R] /Count 3 >>",
        )
        .object(6, "<< /Type /Page /Parent 4 0 R >>")
        .object(7, "<< /Type /Page /Parent 4 0 R >>")
        .object(8, "<< /Type /Page /Parent 5 0 R >>")
        .object(9, "<< /Type /Page /Parent 5 0 R >>")
        .object(3, "<< /Type /Page /Parent 5 0 R >>")
        .object(10, "<< /Kids [11 0 R] >>")
        .object(
            11,
            "<< /Limits [(dest1) (dest2)] \
             /Names [(dest1) [6 0 R /Fit] (dest2) << /D [7 0 R /Fit] >>] >>",
        )
        .object(12, "<< /Names [(note.txt) 13 0 R] >>")
        .object(
            13,
            "<< /Type /Filespec /F (note.txt) /EF << /F 17 0 R >> >>",
        )
        .object(14, "<< /Names [(init) 15 0 R] >>")
        .object(15, "<< /S /JavaScript /JS (app.alert(1);) >>")
        .object(16, "<< /legacy [8 0 R /Fit] >>")
        .stream_object(17, "/Type /EmbeddedFile", b"hello attachment")
        .stream_object(
            18,
            "/Type /Metadata /Subtype /XML",
            b"<x:xmpmeta>test</x:xmpmeta>",
        )
        .object(
            19,
            "<< /Filter /Standard /V 1 /R 2 /P -44 /EncryptMetadata true >>",
        )
        .object(20, "<< /Type /Outlines /First 21 0 R /Last 22 0 R >>")
        .object(
            21,
            "<< /Title (Chapter 1) /Parent 20 0 R /Next 22 0 R /First 23 0 R /Last 23 0 R \
             /Dest [6 0 R /XYZ 0 792 0] /F 2 /C [1 0 0] /Count 1 >>",
        )
        .object(
            22,
            "<< /Title (Links) /Parent 20 0 R /Prev 21 0 R \
             /A << /S /URI /URI (https://example.com) >> >>",
        )
        .object(23, "<< /Title (Section 1.1) /Parent 21 0 R /Dest (dest2) >>")
        .trailer_extra("/Encrypt 19 0 R /ID [<31> <32>]")
        .build(1);

    Document::open(data).unwrap()
}

#[test]
fn num_pages_and_modes() {
    let mut doc = rich_document();
    assert_eq!(doc.num_pages().unwrap(), 5);
    assert_eq!(doc.catalog().page_layout().unwrap(), "TwoColumnLeft");
    assert_eq!(doc.catalog().page_mode().unwrap(), "UseOutlines");
}

#[test]
fn page_labels_follow_style_runs() {
    let mut doc = rich_document();
    let labels = doc.catalog().page_labels().unwrap().unwrap();
    assert_eq!(labels, vec!["A-i", "A-ii", "A-iii", "1", "2"]);
    // Memoized: regenerating yields identical labels.
    assert_eq!(doc.catalog().page_labels().unwrap().unwrap(), labels);
}

#[test]
fn viewer_preferences_validation() {
    let mut doc = rich_document();
    let prefs = doc.catalog().viewer_preferences().unwrap().unwrap();
    assert_eq!(prefs.hide_toolbar, Some(true));
    assert_eq!(prefs.direction.as_deref(), Some("R2L"));
    assert_eq!(prefs.duplex.as_deref(), Some("Simplex"));
    assert_eq!(prefs.print_page_range, Some(vec![1, 2, 2, 5]));
    assert_eq!(prefs.num_copies, Some(2));
    // Invalid name value falls back to the default.
    assert_eq!(prefs.non_full_screen_page_mode.as_deref(), Some("UseNone"));
    // Ill-typed boolean is dropped.
    assert_eq!(prefs.fit_window, None);
    // Absent keys stay unset.
    assert_eq!(prefs.hide_menubar, None);
}

#[test]
fn destinations_merge_tree_and_legacy() {
    let mut doc = rich_document();
    let dests = doc.catalog().destinations().unwrap();
    assert_eq!(dests.len(), 3);
    assert!(matches!(&dests["dest1"], Dest::Array(items) if items.len() == 2));
    // dest2 is wrapped in a /D dictionary.
    assert!(matches!(&dests["dest2"], Dest::Array(items) if items.len() == 2));
    assert!(matches!(&dests["legacy"], Dest::Array(_)));

    assert!(doc.catalog().get_destination("dest1").unwrap().is_some());
    assert!(doc.catalog().get_destination("legacy").unwrap().is_some());
    assert!(doc.catalog().get_destination("nope").unwrap().is_none());
}

#[test]
fn attachments_resolve_embedded_content() {
    let mut doc = rich_document();
    let attachments = doc.catalog().attachments().unwrap().unwrap();
    let note = &attachments["note.txt"];
    assert_eq!(note.filename, "note.txt");
    assert_eq!(note.content.as_deref(), Some(b"hello attachment".as_ref()));
}

#[test]
fn javascript_collects_entries_and_print_action() {
    let mut doc = rich_document();
    let js = doc.catalog().javascript().unwrap().unwrap();
    assert_eq!(js, vec!["app.alert(1);".to_string(), "print({});".to_string()]);
}

#[test]
fn open_action_named_print_has_no_destination() {
    let mut doc = rich_document();
    assert_eq!(doc.catalog().open_action_destination().unwrap(), None);
}

#[test]
fn outline_structure_flags_and_colors() {
    let mut doc = rich_document();
    let outline = doc.catalog().document_outline().unwrap().unwrap();
    assert_eq!(outline.len(), 2);

    let chapter = &outline[0];
    assert_eq!(chapter.title, "Chapter 1");
    assert!(chapter.bold);
    assert!(!chapter.italic);
    assert_eq!(chapter.color, [255, 0, 0]);
    assert_eq!(chapter.count, Some(1));
    assert!(matches!(&chapter.dest, Some(Dest::Array(_))));
    assert_eq!(chapter.items.len(), 1);
    assert_eq!(chapter.items[0].title, "Section 1.1");
    assert_eq!(chapter.items[0].dest, Some(Dest::Named("dest2".into())));

    let links = &outline[1];
    assert_eq!(links.title, "Links");
    assert_eq!(links.url.as_deref(), Some("https://example.com"));
    assert_eq!(links.color, [0, 0, 0]);
}

#[test]
fn permissions_from_encrypt_dictionary() {
    let mut doc = rich_document();
    let flags = doc.catalog().permissions().unwrap().unwrap();
    assert!(flags.contains(PermissionFlags::PRINT));
    assert!(flags.contains(PermissionFlags::COPY));
    assert!(!flags.contains(PermissionFlags::MODIFY_CONTENTS));
}

#[test]
fn metadata_stream_decodes_to_text() {
    let mut doc = rich_document();
    let metadata = doc.catalog().metadata().unwrap().unwrap();
    assert!(metadata.contains("xmpmeta"));
}

#[test]
fn page_dicts_come_back_in_document_order() {
    let mut doc = rich_document();
    let expected_refs = [6u32, 7, 8, 9, 3];
    for (index, expected) in expected_refs.iter().enumerate() {
        let (page, page_ref) = doc.catalog().get_page_dict(index as u32).unwrap();
        assert_eq!(page_ref, Some(Ref::new(*expected, 0)));
        assert_eq!(page.get_raw("Type"), Some(&PdfObject::Name("Page".into())));
    }
    assert!(doc.catalog().get_page_dict(5).is_err());
}

#[test]
fn page_index_inverts_page_dict() {
    let mut doc = rich_document();
    for index in 0..5u32 {
        let (_, page_ref) = doc.catalog().get_page_dict(index).unwrap();
        let back = doc.catalog().get_page_index(page_ref.unwrap()).unwrap();
        assert_eq!(back, index);
    }
}

#[test]
fn kids_count_cache_survives_reordering_of_lookups() {
    let mut doc = rich_document();
    // Look up the last page first so the left subtree gets skipped via its
    // cached count, then walk the earlier ones.
    let (_, last) = doc.catalog().get_page_dict(4).unwrap();
    assert_eq!(last, Some(Ref::new(3, 0)));
    let (_, first) = doc.catalog().get_page_dict(0).unwrap();
    assert_eq!(first, Some(Ref::new(6, 0)));
}

#[test]
fn cleanup_only_drops_caches() {
    let mut doc = rich_document();
    let before = doc.catalog().get_page_dict(2).unwrap().1;
    doc.catalog().cleanup();
    let after = doc.catalog().get_page_dict(2).unwrap().1;
    assert_eq!(before, after);
}
