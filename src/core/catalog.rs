use super::destination::{Dest, ParsedDestination, parse_dest_dictionary};
use super::error::{PdfError, PdfResult};
use super::file_spec::{Attachment, FileSpec};
use super::name_tree::{NameTree, NumberTree};
use super::primitives::{Dict, PdfObject, Ref, to_pdf_string};
use super::xref::XRef;
use bitflags::bitflags;
use indexmap::IndexMap;
use log::warn;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

bitflags! {
    /// User-access permission bits from the encryption dictionary's /P value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PermissionFlags: u32 {
        const PRINT = 1 << 2;
        const MODIFY_CONTENTS = 1 << 3;
        const COPY = 1 << 4;
        const MODIFY_ANNOTATIONS = 1 << 5;
        const FILL_INTERACTIVE_FORMS = 1 << 8;
        const COPY_FOR_ACCESSIBILITY = 1 << 9;
        const ASSEMBLE = 1 << 10;
        const PRINT_HIGH_QUALITY = 1 << 11;
    }
}

/// Validated subset of the catalog's /ViewerPreferences dictionary. `None`
/// fields were absent (or present with an invalid value, for the keys the
/// validator drops rather than defaults).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewerPreferences {
    pub hide_toolbar: Option<bool>,
    pub hide_menubar: Option<bool>,
    pub hide_window_ui: Option<bool>,
    pub fit_window: Option<bool>,
    pub center_window: Option<bool>,
    pub display_doc_title: Option<bool>,
    pub pick_tray_by_pdf_size: Option<bool>,
    pub non_full_screen_page_mode: Option<String>,
    pub direction: Option<String>,
    pub view_area: Option<String>,
    pub view_clip: Option<String>,
    pub print_area: Option<String>,
    pub print_clip: Option<String>,
    pub print_scaling: Option<String>,
    pub duplex: Option<String>,
    pub print_page_range: Option<Vec<u32>>,
    pub num_copies: Option<i64>,
}

/// One bookmark of the document outline.
#[derive(Debug, Clone)]
pub struct OutlineItem {
    pub title: String,
    pub dest: Option<Dest>,
    pub url: Option<String>,
    pub unsafe_url: Option<String>,
    pub new_window: Option<bool>,
    pub action: Option<String>,
    pub count: Option<i64>,
    pub bold: bool,
    pub italic: bool,
    /// RGB, black unless the item carries a valid non-black /C entry.
    pub color: [u8; 3],
    pub items: Vec<OutlineItem>,
}

/// High-level views over the document's root dictionary.
///
/// Every getter memoizes its result. Structural errors inside the optional
/// views are logged and demoted to `None`; the missing-data condition always
/// propagates so a progressive caller can fetch and retry.
pub struct Catalog {
    xref: XRef,
    root: Dict,
    base_url: Option<String>,
    page_kids_count_cache: FxHashMap<Ref, i64>,
    num_pages_memo: Option<u32>,
    metadata_memo: Option<Option<String>>,
    page_layout_memo: Option<String>,
    page_mode_memo: Option<String>,
    viewer_prefs_memo: Option<Option<ViewerPreferences>>,
    open_action_memo: Option<Option<Dest>>,
    outline_memo: Option<Option<Vec<OutlineItem>>>,
    permissions_memo: Option<Option<PermissionFlags>>,
    destinations_memo: Option<IndexMap<String, Dest>>,
    page_labels_memo: Option<Option<Vec<String>>>,
    attachments_memo: Option<Option<IndexMap<String, Attachment>>>,
    javascript_memo: Option<Option<Vec<String>>>,
}

const PAGE_LAYOUT_VALUES: [&str; 6] = [
    "SinglePage",
    "OneColumn",
    "TwoColumnLeft",
    "TwoColumnRight",
    "TwoPageLeft",
    "TwoPageRight",
];

const PAGE_MODE_VALUES: [&str; 6] = [
    "UseNone",
    "UseOutlines",
    "UseThumbs",
    "FullScreen",
    "UseOC",
    "UseAttachments",
];

impl Catalog {
    /// Builds the catalog over a parsed cross-reference table. Fails when
    /// `parse` has not established a root dictionary.
    pub fn new(xref: XRef, base_url: Option<String>) -> PdfResult<Self> {
        let root = xref
            .catalog_dict()
            .cloned()
            .ok_or_else(|| PdfError::format("catalog requires a parsed root dictionary"))?;
        Ok(Catalog {
            xref,
            root,
            base_url,
            page_kids_count_cache: FxHashMap::default(),
            num_pages_memo: None,
            metadata_memo: None,
            page_layout_memo: None,
            page_mode_memo: None,
            viewer_prefs_memo: None,
            open_action_memo: None,
            outline_memo: None,
            permissions_memo: None,
            destinations_memo: None,
            page_labels_memo: None,
            attachments_memo: None,
            javascript_memo: None,
        })
    }

    pub fn xref(&self) -> &XRef {
        &self.xref
    }

    pub fn xref_mut(&mut self) -> &mut XRef {
        &mut self.xref
    }

    pub fn root(&self) -> &Dict {
        &self.root
    }

    /// Normalizes a destination or action dictionary; see
    /// `destination::parse_dest_dictionary`.
    pub fn parse_dest_dictionary(
        xref: &mut XRef,
        dest_dict: &Dict,
        base_url: Option<&str>,
    ) -> PdfResult<ParsedDestination> {
        parse_dest_dictionary(xref, dest_dict, base_url)
    }

    /// Drops the performance caches. Purely an optimization boundary; every
    /// view recomputes correctly afterwards.
    pub fn cleanup(&mut self) {
        self.page_kids_count_cache.clear();
    }

    // ========================================================================
    // Document-level views
    // ========================================================================

    pub fn toplevel_pages_dict(&mut self) -> PdfResult<Dict> {
        self.root
            .get_dict(&mut self.xref, "Pages")?
            .ok_or_else(|| PdfError::format("catalog /Pages is missing or not a dictionary"))
    }

    pub fn num_pages(&mut self) -> PdfResult<u32> {
        if let Some(n) = self.num_pages_memo {
            return Ok(n);
        }
        let pages = self.toplevel_pages_dict()?;
        let count = pages
            .get_i64(&mut self.xref, "Count")?
            .ok_or_else(|| PdfError::format("page tree root missing /Count"))?;
        let n = u32::try_from(count)
            .map_err(|_| PdfError::format(format!("invalid page count: {}", count)))?;
        self.num_pages_memo = Some(n);
        Ok(n)
    }

    /// The document's XMP metadata as UTF-8 text, when present and valid.
    pub fn metadata(&mut self) -> PdfResult<Option<String>> {
        if let Some(memo) = &self.metadata_memo {
            return Ok(memo.clone());
        }
        let value = match self.read_metadata() {
            Ok(value) => value,
            Err(e) if e.is_data_missing() => return Err(e),
            Err(e) => {
                warn!("catalog: unable to read metadata: {}", e);
                None
            }
        };
        self.metadata_memo = Some(value.clone());
        Ok(value)
    }

    fn read_metadata(&mut self) -> PdfResult<Option<String>> {
        let Some(PdfObject::Reference(stream_ref)) = self.root.get_raw("Metadata").cloned()
        else {
            return Ok(None);
        };

        // Some documents encrypt everything except their metadata stream; in
        // that case the bytes must not be run through the cipher.
        let suppress = matches!(
            self.xref
                .encrypt()
                .and_then(|enc| enc.get_raw("EncryptMetadata")),
            Some(PdfObject::Boolean(false))
        );

        let obj = self.xref.fetch_with(stream_ref, suppress)?;
        let Some(stream) = obj.as_stream() else {
            return Ok(None);
        };
        let type_ok = matches!(
            stream.dict.get_raw("Type"),
            Some(PdfObject::Name(name)) if name == "Metadata"
        );
        let subtype_ok = matches!(
            stream.dict.get_raw("Subtype"),
            Some(PdfObject::Name(name)) if name == "XML"
        );
        if !type_ok || !subtype_ok {
            return Ok(None);
        }
        let bytes = stream.decoded_bytes()?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// `/PageLayout`, or the empty string when absent or invalid (on purpose
    /// not the PDF-standard `SinglePage` default: the viewer decides).
    pub fn page_layout(&mut self) -> PdfResult<String> {
        if let Some(memo) = &self.page_layout_memo {
            return Ok(memo.clone());
        }
        let value = match self.root.get(&mut self.xref, "PageLayout")? {
            Some(PdfObject::Name(name)) if PAGE_LAYOUT_VALUES.contains(&name.as_str()) => name,
            _ => String::new(),
        };
        self.page_layout_memo = Some(value.clone());
        Ok(value)
    }

    pub fn page_mode(&mut self) -> PdfResult<String> {
        if let Some(memo) = &self.page_mode_memo {
            return Ok(memo.clone());
        }
        let value = match self.root.get(&mut self.xref, "PageMode")? {
            Some(PdfObject::Name(name)) if PAGE_MODE_VALUES.contains(&name.as_str()) => name,
            _ => "UseNone".to_string(),
        };
        self.page_mode_memo = Some(value.clone());
        Ok(value)
    }

    pub fn viewer_preferences(&mut self) -> PdfResult<Option<ViewerPreferences>> {
        if let Some(memo) = &self.viewer_prefs_memo {
            return Ok(memo.clone());
        }
        let value = match self.read_viewer_preferences() {
            Ok(value) => value,
            Err(e) if e.is_data_missing() => return Err(e),
            Err(e) => {
                warn!("catalog: unable to read viewer preferences: {}", e);
                None
            }
        };
        self.viewer_prefs_memo = Some(value.clone());
        Ok(value)
    }

    fn read_viewer_preferences(&mut self) -> PdfResult<Option<ViewerPreferences>> {
        let Some(vp) = self.root.get_dict(&mut self.xref, "ViewerPreferences")? else {
            return Ok(None);
        };
        let mut prefs = ViewerPreferences::default();

        let bool_keys: [(&str, fn(&mut ViewerPreferences) -> &mut Option<bool>); 7] = [
            ("HideToolbar", |p| &mut p.hide_toolbar),
            ("HideMenubar", |p| &mut p.hide_menubar),
            ("HideWindowUI", |p| &mut p.hide_window_ui),
            ("FitWindow", |p| &mut p.fit_window),
            ("CenterWindow", |p| &mut p.center_window),
            ("DisplayDocTitle", |p| &mut p.display_doc_title),
            ("PickTrayByPDFSize", |p| &mut p.pick_tray_by_pdf_size),
        ];
        for (key, field) in bool_keys {
            if !vp.has(key) {
                continue;
            }
            match vp.get(&mut self.xref, key)? {
                Some(PdfObject::Boolean(b)) => *field(&mut prefs) = Some(b),
                other => warn!("viewer preferences: /{} is not a boolean: {:?}", key, other),
            }
        }

        type NameField = fn(&mut ViewerPreferences) -> &mut Option<String>;
        let name_keys: [(&str, &[&str], &str, NameField); 8] = [
            (
                "NonFullScreenPageMode",
                &["UseNone", "UseOutlines", "UseThumbs", "UseOC"],
                "UseNone",
                |p| &mut p.non_full_screen_page_mode,
            ),
            ("Direction", &["L2R", "R2L"], "L2R", |p| &mut p.direction),
            (
                "ViewArea",
                &["MediaBox", "CropBox", "BleedBox", "TrimBox", "ArtBox"],
                "CropBox",
                |p| &mut p.view_area,
            ),
            (
                "ViewClip",
                &["MediaBox", "CropBox", "BleedBox", "TrimBox", "ArtBox"],
                "CropBox",
                |p| &mut p.view_clip,
            ),
            (
                "PrintArea",
                &["MediaBox", "CropBox", "BleedBox", "TrimBox", "ArtBox"],
                "CropBox",
                |p| &mut p.print_area,
            ),
            (
                "PrintClip",
                &["MediaBox", "CropBox", "BleedBox", "TrimBox", "ArtBox"],
                "CropBox",
                |p| &mut p.print_clip,
            ),
            (
                "PrintScaling",
                &["None", "AppDefault"],
                "AppDefault",
                |p| &mut p.print_scaling,
            ),
            (
                "Duplex",
                &["Simplex", "DuplexFlipShortEdge", "DuplexFlipLongEdge"],
                "None",
                |p| &mut p.duplex,
            ),
        ];
        for (key, allowed, default, field) in name_keys {
            if !vp.has(key) {
                continue;
            }
            let value = match vp.get(&mut self.xref, key)? {
                Some(PdfObject::Name(name)) if allowed.contains(&name.as_str()) => name,
                other => {
                    warn!(
                        "viewer preferences: invalid /{} value {:?}, using default",
                        key, other
                    );
                    default.to_string()
                }
            };
            *field(&mut prefs) = Some(value);
        }

        if vp.has("PrintPageRange") {
            match vp.get_array(&mut self.xref, "PrintPageRange")? {
                Some(items) if !items.is_empty() && items.len() % 2 == 0 => {
                    let num_pages = self.num_pages()? as i64;
                    let pages: Option<Vec<u32>> = items
                        .iter()
                        .map(PdfObject::as_i64)
                        .enumerate()
                        .scan(0i64, |prev, (i, page)| {
                            let Some(page) = page else {
                                return Some(None);
                            };
                            // Positive, within the document and non-decreasing.
                            if page < 1 || page > num_pages || (i > 0 && page < *prev) {
                                return Some(None);
                            }
                            *prev = page;
                            Some(Some(page as u32))
                        })
                        .collect();
                    match pages {
                        Some(pages) => prefs.print_page_range = Some(pages),
                        None => warn!("viewer preferences: dropping invalid /PrintPageRange"),
                    }
                }
                _ => warn!("viewer preferences: dropping invalid /PrintPageRange"),
            }
        }

        if vp.has("NumCopies") {
            match vp.get(&mut self.xref, "NumCopies")? {
                Some(PdfObject::Integer(n)) if n > 0 => prefs.num_copies = Some(n),
                other => warn!("viewer preferences: invalid /NumCopies: {:?}", other),
            }
        }

        Ok(Some(prefs))
    }

    /// The destination the viewer should navigate to on open.
    pub fn open_action_destination(&mut self) -> PdfResult<Option<Dest>> {
        if let Some(memo) = &self.open_action_memo {
            return Ok(memo.clone());
        }
        let value = match self.read_open_action_destination() {
            Ok(value) => value,
            Err(e) if e.is_data_missing() => return Err(e),
            Err(e) => {
                warn!("catalog: unable to read open action: {}", e);
                None
            }
        };
        self.open_action_memo = Some(value.clone());
        Ok(value)
    }

    fn read_open_action_destination(&mut self) -> PdfResult<Option<Dest>> {
        match self.root.get(&mut self.xref, "OpenAction")? {
            Some(PdfObject::Dictionary(action)) => {
                let mut wrapper = Dict::new();
                wrapper.insert("A", PdfObject::Dictionary(action));
                let parsed =
                    parse_dest_dictionary(&mut self.xref, &wrapper, self.base_url.as_deref())?;
                Ok(parsed.dest)
            }
            Some(PdfObject::Array(items)) => Ok(Some(Dest::Array(items))),
            _ => Ok(None),
        }
    }

    /// Decodes `/Encrypt /P` into permission flags. `None` without an
    /// encryption dictionary or a numeric P.
    pub fn permissions(&mut self) -> PdfResult<Option<PermissionFlags>> {
        if let Some(memo) = self.permissions_memo {
            return Ok(memo);
        }
        let value = match self.read_permissions() {
            Ok(value) => value,
            Err(e) if e.is_data_missing() => return Err(e),
            Err(e) => {
                warn!("catalog: unable to read permissions: {}", e);
                None
            }
        };
        self.permissions_memo = Some(value);
        Ok(value)
    }

    fn read_permissions(&mut self) -> PdfResult<Option<PermissionFlags>> {
        let Some(encrypt) = self.xref.encrypt().cloned() else {
            return Ok(None);
        };
        let Some(p) = encrypt.get_i64(&mut self.xref, "P")? else {
            return Ok(None);
        };
        // P is a signed 32-bit value; reinterpret it as the unsigned bitfield.
        let bits = (p as i32) as u32;
        Ok(Some(PermissionFlags::from_bits_truncate(bits)))
    }

    // ========================================================================
    // Destinations
    // ========================================================================

    /// All named destinations: the `/Names/Dests` name tree merged with the
    /// legacy `/Dests` dictionary.
    pub fn destinations(&mut self) -> PdfResult<IndexMap<String, Dest>> {
        if let Some(memo) = &self.destinations_memo {
            return Ok(memo.clone());
        }
        let mut out = IndexMap::new();

        if let Some(tree_root) = self.dests_tree_root()? {
            let tree = NameTree::new(tree_root);
            for (key, raw) in tree.get_all(&mut self.xref)? {
                let value = self.xref.fetch_if_ref(&raw)?;
                if let Some(dest) = fetch_destination(&mut self.xref, &value)? {
                    out.insert(to_pdf_string(&key), dest);
                }
            }
        }

        if let Some(legacy) = self.root.get_dict(&mut self.xref, "Dests")? {
            let keys: Vec<String> = legacy.keys().map(str::to_string).collect();
            for key in keys {
                if let Some(value) = legacy.get(&mut self.xref, &key)? {
                    if let Some(dest) = fetch_destination(&mut self.xref, &value)? {
                        out.insert(key, dest);
                    }
                }
            }
        }

        self.destinations_memo = Some(out.clone());
        Ok(out)
    }

    /// Single-key destination lookup over the same two sources.
    pub fn get_destination(&mut self, id: &str) -> PdfResult<Option<Dest>> {
        if let Some(tree_root) = self.dests_tree_root()? {
            let tree = NameTree::new(tree_root);
            if let Some(value) = tree.get(&mut self.xref, id.as_bytes())? {
                return fetch_destination(&mut self.xref, &value);
            }
        }
        if let Some(legacy) = self.root.get_dict(&mut self.xref, "Dests")? {
            if let Some(value) = legacy.get(&mut self.xref, id)? {
                return fetch_destination(&mut self.xref, &value);
            }
        }
        Ok(None)
    }

    fn dests_tree_root(&mut self) -> PdfResult<Option<PdfObject>> {
        let Some(names) = self.root.get_dict(&mut self.xref, "Names")? else {
            return Ok(None);
        };
        Ok(names.get_raw("Dests").cloned())
    }

    // ========================================================================
    // Page labels
    // ========================================================================

    /// One display label per page, derived from the `/PageLabels` number
    /// tree's style runs.
    pub fn page_labels(&mut self) -> PdfResult<Option<Vec<String>>> {
        if let Some(memo) = &self.page_labels_memo {
            return Ok(memo.clone());
        }
        let value = match self.read_page_labels() {
            Ok(value) => value,
            Err(e) if e.is_data_missing() => return Err(e),
            Err(e) => {
                warn!("catalog: unable to read page labels: {}", e);
                None
            }
        };
        self.page_labels_memo = Some(value.clone());
        Ok(value)
    }

    fn read_page_labels(&mut self) -> PdfResult<Option<Vec<String>>> {
        let Some(tree_root) = self.root.get_raw("PageLabels").cloned() else {
            return Ok(None);
        };
        let num_pages = self.num_pages()?;
        let nums = NumberTree::new(tree_root).get_all(&mut self.xref)?;

        let mut labels = Vec::with_capacity(num_pages as usize);
        let mut style: Option<char> = None;
        let mut prefix = String::new();
        let mut current_index: i64 = 1;

        for i in 0..num_pages as i64 {
            if let Some(raw) = nums.get(&i).cloned() {
                let entry = self.xref.fetch_if_ref(&raw)?;
                let Some(label_dict) = entry.as_dict() else {
                    return Err(PdfError::format("PageLabel entry is not a dictionary"));
                };
                let label_dict = label_dict.clone();

                match label_dict.get(&mut self.xref, "S")? {
                    Some(PdfObject::Name(name)) => {
                        if !matches!(name.as_str(), "D" | "R" | "r" | "A" | "a") {
                            return Err(PdfError::format(format!(
                                "invalid PageLabel style: {}",
                                name
                            )));
                        }
                        style = name.chars().next();
                    }
                    None => style = None,
                    Some(_) => {
                        return Err(PdfError::format("PageLabel style is not a name"));
                    }
                }

                match label_dict.get(&mut self.xref, "P")? {
                    Some(PdfObject::String(bytes)) => prefix = to_pdf_string(&bytes),
                    None => prefix.clear(),
                    Some(_) => return Err(PdfError::format("PageLabel prefix is not a string")),
                }

                match label_dict.get(&mut self.xref, "St")? {
                    Some(PdfObject::Integer(st)) if st >= 1 => current_index = st,
                    None => current_index = 1,
                    Some(_) => return Err(PdfError::format("invalid PageLabel start value")),
                }
            }

            let label = match style {
                Some('D') => current_index.to_string(),
                Some('R') => to_roman(current_index, false),
                Some('r') => to_roman(current_index, true),
                Some('A') => alpha_label(current_index, b'A'),
                Some('a') => alpha_label(current_index, b'a'),
                _ => String::new(),
            };
            labels.push(format!("{}{}", prefix, label));
            current_index += 1;
        }

        Ok(Some(labels))
    }

    // ========================================================================
    // Attachments and JavaScript
    // ========================================================================

    /// Embedded files from the `/Names/EmbeddedFiles` tree, keyed by their
    /// tree name.
    pub fn attachments(&mut self) -> PdfResult<Option<IndexMap<String, Attachment>>> {
        if let Some(memo) = &self.attachments_memo {
            return Ok(memo.clone());
        }
        let value = match self.read_attachments() {
            Ok(value) => value,
            Err(e) if e.is_data_missing() => return Err(e),
            Err(e) => {
                warn!("catalog: unable to read attachments: {}", e);
                None
            }
        };
        self.attachments_memo = Some(value.clone());
        Ok(value)
    }

    fn read_attachments(&mut self) -> PdfResult<Option<IndexMap<String, Attachment>>> {
        let Some(names) = self.root.get_dict(&mut self.xref, "Names")? else {
            return Ok(None);
        };
        let Some(tree_root) = names.get_raw("EmbeddedFiles").cloned() else {
            return Ok(None);
        };

        let mut out = IndexMap::new();
        for (key, raw) in NameTree::new(tree_root).get_all(&mut self.xref)? {
            let value = self.xref.fetch_if_ref(&raw)?;
            let Some(spec_dict) = value.as_dict() else {
                continue;
            };
            let spec = FileSpec::new(spec_dict.clone());
            out.insert(to_pdf_string(&key), spec.serializable(&mut self.xref)?);
        }
        Ok(if out.is_empty() { None } else { Some(out) })
    }

    /// Document-level JavaScript: the `/Names/JavaScript` tree entries, plus
    /// a synthesized `print({});` when the open action is the named Print
    /// action.
    pub fn javascript(&mut self) -> PdfResult<Option<Vec<String>>> {
        if let Some(memo) = &self.javascript_memo {
            return Ok(memo.clone());
        }
        let value = match self.read_javascript() {
            Ok(value) => value,
            Err(e) if e.is_data_missing() => return Err(e),
            Err(e) => {
                warn!("catalog: unable to read document javascript: {}", e);
                None
            }
        };
        self.javascript_memo = Some(value.clone());
        Ok(value)
    }

    fn read_javascript(&mut self) -> PdfResult<Option<Vec<String>>> {
        let mut out = Vec::new();

        let tree_root = match self.root.get_dict(&mut self.xref, "Names")? {
            Some(names) => names.get_raw("JavaScript").cloned(),
            None => None,
        };
        if let Some(tree_root) = tree_root {
            for (_, raw) in NameTree::new(tree_root).get_all(&mut self.xref)? {
                let value = self.xref.fetch_if_ref(&raw)?;
                let Some(js_dict) = value.as_dict() else {
                    continue;
                };
                let js_dict = js_dict.clone();
                if js_dict.get_name(&mut self.xref, "S")?.as_deref() != Some("JavaScript") {
                    continue;
                }
                match js_dict.get(&mut self.xref, "JS")? {
                    Some(PdfObject::String(bytes)) => out.push(to_pdf_string(&bytes)),
                    Some(PdfObject::Stream(stream)) => {
                        out.push(String::from_utf8_lossy(&stream.decoded_bytes()?).into_owned());
                    }
                    _ => {}
                }
            }
        }

        if let Some(PdfObject::Dictionary(action)) = self.root.get(&mut self.xref, "OpenAction")? {
            let is_named = action.get_name(&mut self.xref, "S")?.as_deref() == Some("Named");
            let is_print = action.get_name(&mut self.xref, "N")?.as_deref() == Some("Print");
            if is_named && is_print {
                out.push("print({});".to_string());
            }
        }

        Ok(if out.is_empty() { None } else { Some(out) })
    }

    // ========================================================================
    // Outline
    // ========================================================================

    pub fn document_outline(&mut self) -> PdfResult<Option<Vec<OutlineItem>>> {
        if let Some(memo) = &self.outline_memo {
            return Ok(memo.clone());
        }
        let value = match self.read_document_outline() {
            Ok(value) => value,
            Err(e) if e.is_data_missing() => return Err(e),
            Err(e) => {
                warn!("catalog: unable to read document outline: {}", e);
                None
            }
        };
        self.outline_memo = Some(value.clone());
        Ok(value)
    }

    /// Walks the `First`/`Next` sibling chains breadth-first. A visited-ref
    /// set guards against self-referential chains in corrupt files; each
    /// node is seen at most once.
    fn read_document_outline(&mut self) -> PdfResult<Option<Vec<OutlineItem>>> {
        let Some(outlines) = self.root.get_dict(&mut self.xref, "Outlines")? else {
            return Ok(None);
        };
        let Some(PdfObject::Reference(first)) = outlines.get_raw("First").cloned() else {
            return Ok(None);
        };

        // Arena of (item, child indices); index 0 is the synthetic root.
        let mut slots: Vec<(Option<OutlineItem>, Vec<usize>)> = vec![(
            Some(OutlineItem {
                title: String::new(),
                dest: None,
                url: None,
                unsafe_url: None,
                new_window: None,
                action: None,
                count: None,
                bold: false,
                italic: false,
                color: [0, 0, 0],
                items: Vec::new(),
            }),
            Vec::new(),
        )];

        let mut queue: VecDeque<(Ref, usize)> = VecDeque::new();
        queue.push_back((first, 0));
        let mut visited: FxHashSet<Ref> = FxHashSet::default();
        visited.insert(first);

        while let Some((node_ref, parent_idx)) = queue.pop_front() {
            let obj = self.xref.fetch(node_ref)?;
            let Some(dict) = obj.as_dict() else {
                continue;
            };
            let dict = dict.clone();

            let title_bytes = match dict.get(&mut self.xref, "Title")? {
                Some(PdfObject::String(bytes)) => bytes,
                _ => return Err(PdfError::format("outline item missing /Title")),
            };

            let parsed = parse_dest_dictionary(&mut self.xref, &dict, self.base_url.as_deref())?;
            let count = dict.get_i64(&mut self.xref, "Count")?;
            let flags = dict.get_i64(&mut self.xref, "F")?.unwrap_or(0);
            let color = outline_color(&mut self.xref, &dict)?;

            let item = OutlineItem {
                title: to_pdf_string(&title_bytes),
                dest: parsed.dest,
                url: parsed.url,
                unsafe_url: parsed.unsafe_url,
                new_window: parsed.new_window,
                action: parsed.action,
                count,
                bold: flags & 2 != 0,
                italic: flags & 1 != 0,
                color,
                items: Vec::new(),
            };

            let idx = slots.len();
            slots.push((Some(item), Vec::new()));
            slots[parent_idx].1.push(idx);

            if let Some(PdfObject::Reference(child)) = dict.get_raw("First") {
                if visited.insert(*child) {
                    queue.push_back((*child, idx));
                }
            }
            if let Some(PdfObject::Reference(next)) = dict.get_raw("Next") {
                if visited.insert(*next) {
                    queue.push_back((*next, parent_idx));
                }
            }
        }

        // Children always sit at larger indices than their parent, so one
        // reverse pass assembles the tree bottom-up.
        for i in (0..slots.len()).rev() {
            let children = std::mem::take(&mut slots[i].1);
            let mut items = Vec::with_capacity(children.len());
            for child in children {
                items.push(slots[child].0.take().expect("child assembled once"));
            }
            slots[i].0.as_mut().expect("slot occupied").items = items;
        }

        let root_items = slots[0].0.take().expect("root slot").items;
        Ok(if root_items.is_empty() {
            None
        } else {
            Some(root_items)
        })
    }

    // ========================================================================
    // Page tree
    // ========================================================================

    /// Locates the page dictionary at `page_index`, skipping whole subtrees
    /// whose cumulative leaf count (cached per node reference) lies before
    /// the target.
    pub fn get_page_dict(&mut self, page_index: u32) -> PdfResult<(Dict, Option<Ref>)> {
        let Some(pages_raw) = self.root.get_raw("Pages").cloned() else {
            return Err(PdfError::format("catalog missing /Pages"));
        };

        let target = page_index as i64;
        let mut current: i64 = 0;
        let mut nodes: Vec<PdfObject> = vec![pages_raw];
        let mut visited: FxHashSet<Ref> = FxHashSet::default();

        while let Some(node) = nodes.pop() {
            let (dict, node_ref) = match node {
                PdfObject::Reference(r) => {
                    if !visited.insert(r) {
                        return Err(PdfError::format("circular reference in page tree"));
                    }
                    if let Some(&count) = self.page_kids_count_cache.get(&r) {
                        if current + count <= target {
                            current += count;
                            continue;
                        }
                    }
                    match &*self.xref.fetch(r)? {
                        PdfObject::Dictionary(dict) => (dict.clone(), Some(r)),
                        _ => {
                            return Err(PdfError::format(
                                "page tree node reference is not a dictionary",
                            ));
                        }
                    }
                }
                PdfObject::Dictionary(dict) => (dict, None),
                other => {
                    return Err(PdfError::format(format!(
                        "invalid page tree node: {:?}",
                        other
                    )));
                }
            };

            let type_name = dict.get_name(&mut self.xref, "Type")?;
            let is_leaf = match type_name.as_deref() {
                Some("Page") => true,
                Some(_) => false,
                // Missing /Type is tolerated when the node otherwise looks
                // like a page.
                None => !dict.has("Kids") && dict.has("Contents"),
            };

            if is_leaf {
                if current == target {
                    if let Some(r) = node_ref {
                        self.page_kids_count_cache.insert(r, 1);
                    }
                    return Ok((dict, node_ref));
                }
                current += 1;
                continue;
            }

            if let Some(count) = dict.get_i64(&mut self.xref, "Count")? {
                if count >= 0 {
                    if let Some(r) = node_ref {
                        self.page_kids_count_cache.entry(r).or_insert(count);
                    }
                    if current + count <= target {
                        current += count;
                        continue;
                    }
                }
            }

            match dict.get(&mut self.xref, "Kids")? {
                Some(PdfObject::Array(kids)) => {
                    // Reverse so the first kid is visited first.
                    for kid in kids.iter().rev() {
                        nodes.push(kid.clone());
                    }
                }
                _ => {
                    // An inlined page dict sometimes carries a bogus Kids
                    // value; treat it as a leaf if it can hold content.
                    if dict.has("Contents") {
                        if current == target {
                            return Ok((dict, node_ref));
                        }
                        current += 1;
                        continue;
                    }
                    return Err(PdfError::format("page tree node /Kids is not an array"));
                }
            }
        }

        Err(PdfError::format(format!(
            "page index {} is out of range",
            page_index
        )))
    }

    /// Inverse of `get_page_dict`: document-order index of the page with the
    /// given reference, computed by summing sibling counts while walking up
    /// the `Parent` chain.
    pub fn get_page_index(&mut self, page_ref: Ref) -> PdfResult<u32> {
        let mut total: i64 = 0;
        let mut current = page_ref;
        let mut visited: FxHashSet<Ref> = FxHashSet::default();
        visited.insert(page_ref);

        loop {
            let node = self.xref.fetch(current)?;
            let Some(dict) = node.as_dict() else {
                return Err(PdfError::format("page tree node is not a dictionary"));
            };

            let Some(PdfObject::Reference(parent_ref)) = dict.get_raw("Parent").cloned() else {
                break;
            };
            if !visited.insert(parent_ref) {
                return Err(PdfError::format("circular reference in page tree"));
            }

            let parent = self.xref.fetch(parent_ref)?;
            let Some(parent_dict) = parent.as_dict() else {
                return Err(PdfError::format("page tree parent is not a dictionary"));
            };
            let parent_dict = parent_dict.clone();
            let kids = parent_dict
                .get_array(&mut self.xref, "Kids")?
                .ok_or_else(|| PdfError::format("page tree parent missing /Kids"))?;

            let mut found = false;
            for kid in &kids {
                let Some(kid_ref) = kid.as_reference() else {
                    return Err(PdfError::format("page tree kid is not a reference"));
                };
                if kid_ref == current {
                    found = true;
                    break;
                }
                let kid_obj = self.xref.fetch(kid_ref)?;
                let Some(kid_dict) = kid_obj.as_dict() else {
                    return Err(PdfError::format("page tree kid is not a dictionary"));
                };
                let kid_dict = kid_dict.clone();
                match kid_dict.get_i64(&mut self.xref, "Count")? {
                    Some(count) if count >= 0 && kid_dict.has("Kids") => total += count,
                    _ => total += 1,
                }
            }
            if !found {
                return Err(PdfError::format(
                    "page reference not found among its parent's kids",
                ));
            }
            current = parent_ref;
        }

        u32::try_from(total).map_err(|_| PdfError::format("invalid page index"))
    }
}

/// A destination value may be wrapped in a dictionary's /D entry.
fn fetch_destination(xref: &mut XRef, value: &PdfObject) -> PdfResult<Option<Dest>> {
    let inner = match value.as_dict() {
        Some(dict) => dict.get(xref, "D")?,
        None => Some(value.clone()),
    };
    Ok(match inner {
        Some(PdfObject::Array(items)) => Some(Dest::Array(items)),
        Some(PdfObject::Name(name)) => Some(Dest::Named(name)),
        Some(PdfObject::String(bytes)) => Some(Dest::Named(to_pdf_string(&bytes))),
        _ => None,
    })
}

/// `/C` validated as three components in [0, 1]; anything else is black.
fn outline_color(xref: &mut XRef, dict: &Dict) -> PdfResult<[u8; 3]> {
    let black = [0u8, 0, 0];
    let Some(components) = dict.get_array(xref, "C")? else {
        return Ok(black);
    };
    if components.len() != 3 {
        return Ok(black);
    }
    let mut rgb = [0u8; 3];
    for (slot, component) in rgb.iter_mut().zip(&components) {
        match component.as_f64() {
            Some(v) if (0.0..=1.0).contains(&v) => *slot = (v * 255.0).round() as u8,
            _ => return Ok(black),
        }
    }
    Ok(rgb)
}

fn to_roman(number: i64, lowercase: bool) -> String {
    const PAIRS: [(i64, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut remaining = number.max(0);
    let mut out = String::new();
    for (value, numeral) in PAIRS {
        while remaining >= value {
            out.push_str(numeral);
            remaining -= value;
        }
    }
    if lowercase { out.to_lowercase() } else { out }
}

/// Base-26 letter labels: A..Z, then AA..ZZ, and so on.
fn alpha_label(index: i64, base: u8) -> String {
    let idx = (index - 1).max(0);
    let letter = (base + (idx % 26) as u8) as char;
    let repeats = (idx / 26) + 1;
    std::iter::repeat_n(letter, repeats as usize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_roman() {
        assert_eq!(to_roman(1, false), "I");
        assert_eq!(to_roman(4, false), "IV");
        assert_eq!(to_roman(9, false), "IX");
        assert_eq!(to_roman(1994, false), "MCMXCIV");
        assert_eq!(to_roman(3, true), "iii");
    }

    #[test]
    fn test_alpha_label() {
        assert_eq!(alpha_label(1, b'A'), "A");
        assert_eq!(alpha_label(26, b'A'), "Z");
        assert_eq!(alpha_label(27, b'A'), "AA");
        assert_eq!(alpha_label(53, b'a'), "aaa");
    }

    #[test]
    fn test_permission_bits() {
        // -44 is a typical /P value: everything except modify allowed.
        let bits = (-44i64 as i32) as u32;
        let flags = PermissionFlags::from_bits_truncate(bits);
        assert!(flags.contains(PermissionFlags::PRINT));
        assert!(flags.contains(PermissionFlags::COPY));
        assert!(!flags.contains(PermissionFlags::MODIFY_CONTENTS));
    }
}
