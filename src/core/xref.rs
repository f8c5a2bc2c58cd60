use super::base_stream::BaseStream;
use super::crypto::{CipherTransform, CipherTransformFactory};
use super::error::{PdfError, PdfResult};
use super::lexer::Lexer;
use super::parser::Parser;
use super::primitives::{Dict, PdfObject, Ref, StreamObject};
use lazy_static::lazy_static;
use log::warn;
use lru::LruCache;
use regex::bytes::Regex;
use rustc_hash::{FxHashSet, FxHasher};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::hash::BuildHasherDefault;
use std::num::NonZeroUsize;
use std::rc::Rc;

lazy_static! {
    static ref OBJ_HEADER_RE: Regex = Regex::new(r"(?-u)^(\d+)\s+(\d+)\s+obj\b").unwrap();
    static ref NESTED_OBJ_RE: Regex = Regex::new(r"(?-u)\d+\s+\d+\s+obj\b").unwrap();
}

/// Cross-reference table entry.
///
/// Describes where an indirect object lives: nowhere (free slot), at a byte
/// offset in the file, or as a member of an object stream.
#[derive(Debug, Clone, PartialEq)]
pub enum XRefEntry {
    Free { next_free: u64, generation: u16 },
    Uncompressed { offset: u64, generation: u16 },
    Compressed { stream_num: u32, index: u32 },
}

impl XRefEntry {
    pub fn is_free(&self) -> bool {
        matches!(self, XRefEntry::Free { .. })
    }

    pub fn generation(&self) -> u16 {
        match self {
            XRefEntry::Free { generation, .. } => *generation,
            XRefEntry::Uncompressed { generation, .. } => *generation,
            XRefEntry::Compressed { .. } => 0,
        }
    }
}

/// Instrumentation counters incremented by collaborators while they process
/// document content (which stream filters and font types were seen).
#[derive(Debug, Default)]
pub struct DocStats {
    stream_kinds: FxHashSet<String>,
    font_kinds: FxHashSet<String>,
}

impl DocStats {
    pub fn mark_stream_kind(&mut self, kind: &str) {
        if !self.stream_kinds.contains(kind) {
            self.stream_kinds.insert(kind.to_string());
        }
    }

    pub fn mark_font_kind(&mut self, kind: &str) {
        if !self.font_kinds.contains(kind) {
            self.font_kinds.insert(kind.to_string());
        }
    }

    pub fn has_stream_kind(&self, kind: &str) -> bool {
        self.stream_kinds.contains(kind)
    }

    pub fn has_font_kind(&self, kind: &str) -> bool {
        self.font_kinds.contains(kind)
    }
}

/// Resumable progress of a classical-table read. Saved before every entry so
/// a `DataMissing` retry restarts at the interrupted entry, not the section.
#[derive(Debug, Clone)]
struct TableState {
    start_offset: usize,
    pos: usize,
    first: u32,
    count: u32,
    entry_num: u32,
}

/// Marker for an in-flight cross-reference stream read. Entry decoding is
/// atomic once the stream object is resident, so the offset is all a retry
/// needs.
#[derive(Debug, Clone)]
struct StreamState {
    start_offset: usize,
}

type FxBuildHasher = BuildHasherDefault<FxHasher>;

const OBJECT_CACHE_CAPACITY: usize = 1000;

/// Cross-reference resolver: the entry table mapping object numbers to file
/// locations, plus the on-demand object fetcher and its cache.
pub struct XRef {
    stream: Box<dyn BaseStream>,
    entries: Vec<Option<XRefEntry>>,
    cache: LruCache<u32, Rc<PdfObject>, FxBuildHasher>,
    start_xref_queue: VecDeque<usize>,
    parsed_offsets: FxHashSet<usize>,
    pending_refs: FxHashSet<Ref>,
    table_state: Option<TableState>,
    stream_state: Option<StreamState>,
    top_dict: Option<Dict>,
    trailer: Option<Dict>,
    root: Option<Dict>,
    encrypt: Option<Dict>,
    cipher_factory: Option<Rc<dyn CipherTransformFactory>>,
    stats: DocStats,
}

impl XRef {
    pub fn new(stream: Box<dyn BaseStream>) -> Self {
        XRef {
            stream,
            entries: Vec::new(),
            cache: LruCache::with_hasher(
                NonZeroUsize::new(OBJECT_CACHE_CAPACITY).unwrap(),
                FxBuildHasher::default(),
            ),
            start_xref_queue: VecDeque::new(),
            parsed_offsets: FxHashSet::default(),
            pending_refs: FxHashSet::default(),
            table_state: None,
            stream_state: None,
            top_dict: None,
            trailer: None,
            root: None,
            encrypt: None,
            cipher_factory: None,
            stats: DocStats::default(),
        }
    }

    /// Seeds the queue of cross-reference locations with the file-tail
    /// `startxref` value.
    pub fn set_start_xref(&mut self, offset: usize) {
        self.start_xref_queue.push_back(offset);
    }

    pub fn set_cipher_factory(&mut self, factory: Rc<dyn CipherTransformFactory>) {
        self.cipher_factory = Some(factory);
    }

    pub fn trailer(&self) -> Option<&Dict> {
        self.trailer.as_ref()
    }

    /// The document root (catalog) dictionary, set by `parse`.
    pub fn catalog_dict(&self) -> Option<&Dict> {
        self.root.as_ref()
    }

    pub fn encrypt(&self) -> Option<&Dict> {
        self.encrypt.as_ref()
    }

    pub fn cipher_factory(&self) -> Option<&Rc<dyn CipherTransformFactory>> {
        self.cipher_factory.as_ref()
    }

    pub fn stats(&self) -> &DocStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut DocStats {
        &mut self.stats
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Raw entry-table accessor.
    pub fn entry(&self, num: u32) -> Option<&XRefEntry> {
        self.entries.get(num as usize)?.as_ref()
    }

    /// Returns the entry only when it is allocated and points at an actual
    /// file location (nonzero offset).
    pub fn get_entry(&self, num: u32) -> Option<&XRefEntry> {
        match self.entry(num) {
            Some(entry @ XRefEntry::Uncompressed { offset, .. }) if *offset != 0 => Some(entry),
            Some(entry @ XRefEntry::Compressed { .. }) => Some(entry),
            _ => None,
        }
    }

    fn stream_len(&self) -> usize {
        self.stream.length()
    }

    pub fn stream_is_loaded(&self) -> bool {
        self.stream.is_data_loaded()
    }

    pub fn stream_missing_ranges(&self) -> Vec<(usize, usize)> {
        self.stream.missing_ranges()
    }

    pub fn request_range(&mut self, begin: usize, end: usize) -> PdfResult<()> {
        self.stream.request_range(begin, end)
    }

    pub fn request_ranges(&mut self, ranges: &[(usize, usize)]) -> PdfResult<()> {
        self.stream.request_ranges(ranges)
    }

    pub fn make_sub_stream(&self, start: usize, length: usize) -> PdfResult<Box<dyn BaseStream>> {
        self.stream.make_sub_stream(start, length)
    }

    // ========================================================================
    // Parsing
    // ========================================================================

    /// Processes all cross-reference data and establishes `trailer`, the root
    /// dictionary and (when present) the encryption dictionary.
    ///
    /// In normal mode an unreadable structure fails with `XRefParse`, asking
    /// the caller to retry with `recovery_mode` set; recovery failure is
    /// `InvalidPdf`. `DataMissing` propagates in either mode and the call can
    /// be retried after the range arrives — resumable state keeps re-parsing
    /// incremental.
    pub fn parse(&mut self, recovery_mode: bool) -> PdfResult<()> {
        let trailer_dict = if recovery_mode {
            warn!("xref: rebuilding cross-reference data from a full document scan");
            self.index_objects()?
        } else {
            self.read_xref(false)?
                .ok_or_else(|| PdfError::xref_parse("no cross-reference sections found"))?
        };

        if let Some(encrypt_obj) = trailer_dict.get_raw("Encrypt").cloned() {
            match self.fetch_if_ref(&encrypt_obj) {
                Ok(PdfObject::Dictionary(dict)) => self.encrypt = Some(dict),
                Err(e) if e.is_data_missing() => return Err(e),
                other => warn!("xref: unreadable Encrypt dictionary: {:?}", other),
            }
        }

        let root = match trailer_dict.get_raw("Root").cloned() {
            Some(root_obj) => match self.fetch_if_ref(&root_obj) {
                Ok(PdfObject::Dictionary(dict)) if dict.has("Pages") => Some(dict),
                Err(e) if e.is_data_missing() => return Err(e),
                _ => None,
            },
            None => None,
        };

        self.trailer = Some(trailer_dict);
        match root {
            Some(dict) => {
                self.root = Some(dict);
                Ok(())
            }
            None if recovery_mode => Err(PdfError::invalid_pdf(
                "no valid root dictionary after recovery scan",
            )),
            None => Err(PdfError::xref_parse("root dictionary invalid or missing")),
        }
    }

    /// Drains the startxref queue. Each processed offset is recorded in a
    /// visited set so `Prev` chains that loop back terminate. The first
    /// section's dictionary is the document trailer.
    fn read_xref(&mut self, recovery_mode: bool) -> PdfResult<Option<Dict>> {
        while let Some(&offset) = self.start_xref_queue.front() {
            if self.parsed_offsets.contains(&offset) {
                self.start_xref_queue.pop_front();
                continue;
            }

            match self.read_xref_section(offset) {
                Ok(dict) => {
                    self.parsed_offsets.insert(offset);
                    self.start_xref_queue.pop_front();
                    if self.top_dict.is_none() {
                        self.top_dict = Some(dict.clone());
                    }
                    self.enqueue_linked_sections(&dict)?;
                }
                Err(e) if e.is_data_missing() => return Err(e),
                Err(e) if recovery_mode => {
                    warn!("xref: skipping unreadable section at offset {}: {}", offset, e);
                    self.parsed_offsets.insert(offset);
                    self.start_xref_queue.pop_front();
                    self.table_state = None;
                    self.stream_state = None;
                }
                Err(e) => {
                    return Err(PdfError::xref_parse(format!(
                        "invalid cross-reference section at offset {}: {}",
                        offset, e
                    )));
                }
            }
        }
        Ok(self.top_dict.clone())
    }

    /// Queues the hybrid-file `XRefStm` offset and the `Prev` offset of an
    /// incremental update. `Prev` should be a direct number; a reference to a
    /// number is tolerated for non-compliant files, and both the reference
    /// and the offset it yields are cycle-guarded.
    fn enqueue_linked_sections(&mut self, dict: &Dict) -> PdfResult<()> {
        if let Some(stm) = dict.get_raw("XRefStm").and_then(PdfObject::as_i64) {
            if stm >= 0 {
                let pos = stm as usize;
                if !self.parsed_offsets.contains(&pos) {
                    self.start_xref_queue.push_back(pos);
                }
            }
        }

        match dict.get_raw("Prev").cloned() {
            Some(PdfObject::Integer(prev)) if prev >= 0 => {
                let pos = prev as usize;
                if !self.parsed_offsets.contains(&pos) {
                    self.start_xref_queue.push_back(pos);
                }
            }
            Some(PdfObject::Reference(r)) => {
                warn!("xref: /Prev is an indirect reference (non-compliant file)");
                match self.fetch(r) {
                    Ok(obj) => {
                        if let Some(prev) = obj.as_i64().filter(|p| *p >= 0) {
                            let pos = prev as usize;
                            if !self.parsed_offsets.contains(&pos) {
                                self.start_xref_queue.push_back(pos);
                            }
                        }
                    }
                    Err(e) if e.is_data_missing() => return Err(e),
                    Err(e) => warn!("xref: unable to resolve /Prev reference: {}", e),
                }
            }
            Some(other) if !matches!(other, PdfObject::Integer(_)) => {
                warn!("xref: ignoring invalid /Prev value {:?}", other);
            }
            _ => {}
        }
        Ok(())
    }

    /// Parses one section: a classical `xref` table or a cross-reference
    /// stream, resuming from checkpointed state when a retry re-enters.
    fn read_xref_section(&mut self, offset: usize) -> PdfResult<Dict> {
        if self
            .table_state
            .as_ref()
            .is_some_and(|s| s.start_offset == offset)
        {
            return self.process_xref_table(offset);
        }
        if self
            .stream_state
            .as_ref()
            .is_some_and(|s| s.start_offset == offset)
        {
            return self.process_xref_stream(offset);
        }

        if offset >= self.stream_len() {
            return Err(PdfError::format(format!(
                "cross-reference offset {} out of bounds",
                offset
            )));
        }

        let mut pos = offset;
        skip_ws_and_comments(self.stream.as_ref(), &mut pos)?;
        if keyword_at(self.stream.as_ref(), pos, b"xref")? {
            self.table_state = Some(TableState {
                start_offset: offset,
                pos: pos + b"xref".len(),
                first: 0,
                count: 0,
                entry_num: 0,
            });
            self.process_xref_table(offset)
        } else {
            self.stream_state = Some(StreamState {
                start_offset: offset,
            });
            self.process_xref_stream(offset)
        }
    }

    /// Classical table: one or more `FIRST COUNT` subsections of fixed-form
    /// entries, terminated by `trailer` and the trailer dictionary. Entries
    /// never overwrite ones already present — sections are processed newest
    /// first, and the first writer wins.
    fn process_xref_table(&mut self, offset: usize) -> PdfResult<Dict> {
        loop {
            let mut state = self
                .table_state
                .clone()
                .expect("table state present while reading a classical table");
            let mut pos = state.pos;

            if state.entry_num >= state.count {
                // Between subsections: the next token is either another
                // `FIRST COUNT` header or the trailer.
                skip_ws_and_comments(self.stream.as_ref(), &mut pos)?;
                if keyword_at(self.stream.as_ref(), pos, b"trailer")? {
                    pos += b"trailer".len();
                    let dict = self.parse_trailer_dict(pos)?;
                    self.table_state = None;
                    return Ok(dict);
                }

                let first = read_decimal(self.stream.as_ref(), &mut pos)?
                    .ok_or_else(|| PdfError::format("invalid xref subsection header"))?;
                skip_ws_and_comments(self.stream.as_ref(), &mut pos)?;
                let count = read_decimal(self.stream.as_ref(), &mut pos)?
                    .ok_or_else(|| PdfError::format("invalid xref subsection count"))?;

                state.first = u32::try_from(first)
                    .map_err(|_| PdfError::format("xref subsection start too large"))?;
                state.count = u32::try_from(count)
                    .map_err(|_| PdfError::format("xref subsection count too large"))?;
                state.entry_num = 0;
                state.pos = pos;
                self.table_state = Some(state);
                continue;
            }

            // Checkpoint before the entry so a missing-data retry resumes
            // exactly here.
            state.pos = pos;
            self.table_state = Some(state.clone());

            skip_ws_and_comments(self.stream.as_ref(), &mut pos)?;
            let entry_offset = read_decimal(self.stream.as_ref(), &mut pos)?
                .ok_or_else(|| PdfError::format("invalid xref entry offset"))?;
            skip_ws_and_comments(self.stream.as_ref(), &mut pos)?;
            let entry_gen = read_decimal(self.stream.as_ref(), &mut pos)?
                .ok_or_else(|| PdfError::format("invalid xref entry generation"))?;
            skip_ws_and_comments(self.stream.as_ref(), &mut pos)?;
            let kind = match read_byte_at(self.stream.as_ref(), pos)? {
                Some(b @ (b'f' | b'n')) => {
                    pos += 1;
                    b
                }
                other => {
                    return Err(PdfError::format(format!(
                        "invalid xref entry type: {:?}",
                        other
                    )));
                }
            };

            // A first subsection starting at object 1 whose first entry is
            // free really describes object 0; renumber the subsection.
            if state.entry_num == 0 && state.first == 1 && kind == b'f' {
                state.first = 0;
            }

            let generation = (entry_gen.min(u16::MAX as u64)) as u16;
            let entry = match kind {
                b'f' => XRefEntry::Free {
                    next_free: entry_offset,
                    generation,
                },
                _ => XRefEntry::Uncompressed {
                    offset: entry_offset,
                    generation,
                },
            };
            self.set_entry_if_unset(state.first + state.entry_num, entry);

            state.entry_num += 1;
            state.pos = pos;
            state.start_offset = offset;
            self.table_state = Some(state);
        }
    }

    fn parse_trailer_dict(&mut self, pos: usize) -> PdfResult<Dict> {
        let sub = self
            .stream
            .make_sub_stream(pos, self.stream_len() - pos)?;
        let mut parser = Parser::new(Lexer::new(sub)?, false, false)?;
        match parser.get_obj(None)? {
            PdfObject::Dictionary(dict) => Ok(dict),
            other => Err(PdfError::format(format!(
                "trailer is not a dictionary: {:?}",
                other
            ))),
        }
    }

    /// Cross-reference stream: `N G obj` wrapping a stream whose payload is
    /// fixed-width binary entries described by `W` and `Index`. The stream
    /// dictionary doubles as the trailer.
    fn process_xref_stream(&mut self, offset: usize) -> PdfResult<Dict> {
        let sub = self
            .stream
            .make_sub_stream(offset, self.stream_len() - offset)?;
        let mut parser = Parser::new(Lexer::new(sub)?, true, false)?;

        let obj1 = parser.get_obj(Some(self))?;
        let _gen = parser.get_obj(Some(self))?;
        let obj_kw = parser.get_obj(Some(self))?;

        if obj1.as_i64().is_none() {
            return Err(PdfError::format(
                "cross-reference section starts with neither 'xref' nor an object header",
            ));
        }
        if !obj_kw.is_command("obj") {
            return Err(PdfError::format("cross-reference stream missing 'obj'"));
        }

        let stream_obj = match parser.get_obj(Some(self))? {
            PdfObject::Stream(stream) => stream,
            other => {
                return Err(PdfError::format(format!(
                    "cross-reference stream expected, found {:?}",
                    other
                )));
            }
        };

        match stream_obj.dict.get_raw("Type") {
            Some(PdfObject::Name(name)) if name == "XRef" => {}
            _ => return Err(PdfError::format("cross-reference stream is not /Type /XRef")),
        }

        self.decode_xref_stream_entries(&stream_obj)?;
        self.stream_state = None;
        Ok(stream_obj.dict.clone())
    }

    fn decode_xref_stream_entries(&mut self, stream_obj: &StreamObject) -> PdfResult<()> {
        let dict = &stream_obj.dict;

        let widths: Vec<usize> = match dict.get_raw("W") {
            Some(PdfObject::Array(items)) if items.len() >= 3 => items[..3]
                .iter()
                .map(|w| {
                    w.as_i64()
                        .filter(|w| (0..=8).contains(w))
                        .map(|w| w as usize)
                        .ok_or_else(|| PdfError::format("invalid /W field width"))
                })
                .collect::<PdfResult<_>>()?,
            _ => return Err(PdfError::format("cross-reference stream missing /W")),
        };
        let (w_type, w_second, w_third) = (widths[0], widths[1], widths[2]);
        let entry_size = w_type + w_second + w_third;
        if entry_size == 0 {
            return Err(PdfError::format("cross-reference stream with empty entries"));
        }

        let mut ranges: SmallVec<[(u32, u32); 4]> = SmallVec::new();
        match dict.get_raw("Index") {
            Some(PdfObject::Array(items)) => {
                if items.len() % 2 != 0 {
                    return Err(PdfError::format("odd-length /Index array"));
                }
                for pair in items.chunks_exact(2) {
                    let first = pair[0]
                        .as_i64()
                        .filter(|v| *v >= 0)
                        .ok_or_else(|| PdfError::format("invalid /Index entry"))?;
                    let count = pair[1]
                        .as_i64()
                        .filter(|v| *v >= 0)
                        .ok_or_else(|| PdfError::format("invalid /Index entry"))?;
                    ranges.push((first as u32, count as u32));
                }
            }
            None => {
                let size = dict
                    .get_raw("Size")
                    .and_then(PdfObject::as_i64)
                    .filter(|s| *s >= 0)
                    .ok_or_else(|| PdfError::format("cross-reference stream missing /Size"))?;
                ranges.push((0, size as u32));
            }
            Some(_) => return Err(PdfError::format("/Index is not an array")),
        }

        let data = stream_obj.decoded_bytes()?;
        let mut pos = 0;

        for (first, count) in ranges {
            for j in 0..count {
                if pos + entry_size > data.len() {
                    return Err(PdfError::format("cross-reference stream data truncated"));
                }
                // Width 0 for the type field means type 1 (uncompressed).
                let entry_type = if w_type > 0 {
                    read_be(&data[pos..pos + w_type])
                } else {
                    1
                };
                let second = read_be(&data[pos + w_type..pos + w_type + w_second]);
                let third = read_be(&data[pos + w_type + w_second..pos + entry_size]);
                pos += entry_size;

                let entry = match entry_type {
                    0 => XRefEntry::Free {
                        next_free: second,
                        generation: third.min(u16::MAX as u64) as u16,
                    },
                    1 => XRefEntry::Uncompressed {
                        offset: second,
                        generation: third.min(u16::MAX as u64) as u16,
                    },
                    2 => XRefEntry::Compressed {
                        stream_num: second as u32,
                        index: third as u32,
                    },
                    t => {
                        return Err(PdfError::format(format!(
                            "invalid cross-reference stream entry type {} for object {}",
                            t,
                            first + j
                        )));
                    }
                };
                self.set_entry_if_unset(first + j, entry);
            }
        }
        Ok(())
    }

    fn set_entry_if_unset(&mut self, num: u32, entry: XRefEntry) {
        let index = num as usize;
        if self.entries.len() <= index {
            self.entries.resize(index + 1, None);
        }
        if self.entries[index].is_none() {
            self.entries[index] = Some(entry);
        }
    }

    fn set_entry_overwrite(&mut self, num: u32, entry: XRefEntry) {
        let index = num as usize;
        if self.entries.len() <= index {
            self.entries.resize(index + 1, None);
        }
        self.entries[index] = Some(entry);
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Rebuilds the entry table by scanning the whole file for `N G obj`
    /// headers, `trailer` keywords and `/XRef` stream candidates, then elects
    /// the best trailer. Later objects overwrite earlier ones, matching the
    /// file-order semantics of incremental updates.
    fn index_objects(&mut self) -> PdfResult<Dict> {
        let len = self.stream_len();
        let buf = self.stream.get_byte_range(0, len)?;

        self.entries.clear();
        self.cache.clear();
        self.top_dict = None;
        self.start_xref_queue.clear();
        self.parsed_offsets.clear();
        self.pending_refs.clear();
        self.table_state = None;
        self.stream_state = None;

        let mut trailers: Vec<usize> = Vec::new();
        let mut xref_streams: Vec<usize> = Vec::new();

        let mut pos = 0;
        while pos < len {
            let b = buf[pos];
            if is_ws(b) {
                pos += 1;
                continue;
            }
            if b == b'%' {
                while pos < len && buf[pos] != b'\n' && buf[pos] != b'\r' {
                    pos += 1;
                }
                continue;
            }
            if b.is_ascii_digit() {
                if let Some((num, generation, header_len)) = parse_obj_header(&buf[pos..]) {
                    let header_pos = pos;
                    let body_start = pos + header_len;
                    let (content_end, resume) = find_body_end(&buf, body_start);

                    self.set_entry_overwrite(
                        num,
                        XRefEntry::Uncompressed {
                            offset: header_pos as u64,
                            generation,
                        },
                    );
                    if contains_xref_tag(&buf[body_start..content_end]) {
                        xref_streams.push(header_pos);
                    }
                    pos = resume;
                    continue;
                }
                while pos < len && buf[pos].is_ascii_digit() {
                    pos += 1;
                }
                continue;
            }
            if buf[pos..].starts_with(b"trailer") {
                trailers.push(pos + b"trailer".len());
                pos += b"trailer".len();
                continue;
            }
            // Skip over the token.
            let token_start = pos;
            while pos < len && !is_ws(buf[pos]) && !is_delim(buf[pos]) {
                pos += 1;
            }
            if pos == token_start {
                pos += 1;
            }
        }

        // Read candidate cross-reference streams tolerantly: they contribute
        // compressed-entry locations the object scan cannot see. The entries
        // recovered from headers stay authoritative (first writer wins).
        for offset in xref_streams {
            if !self.parsed_offsets.contains(&offset) {
                self.start_xref_queue.push_back(offset);
            }
        }
        if !self.start_xref_queue.is_empty() {
            self.read_xref(true)?;
        }

        // Elect a trailer: first candidate in document order whose root
        // resolves to a dictionary with /Pages and that carries /ID, else
        // the last structurally valid one.
        let mut last_valid: Option<Dict> = None;
        for trailer_pos in trailers {
            let sub = self.stream.make_sub_stream(trailer_pos, len - trailer_pos)?;
            let mut parser = Parser::new(Lexer::new(sub)?, false, true)?;
            let dict = match parser.get_obj(None) {
                Ok(PdfObject::Dictionary(dict)) => dict,
                Ok(_) => continue,
                Err(e) if e.is_data_missing() => return Err(e),
                Err(_) => continue,
            };
            if self.root_validates(&dict)? {
                if dict.has("ID") {
                    return Ok(dict);
                }
                last_valid = Some(dict);
            }
        }
        if let Some(dict) = last_valid {
            return Ok(dict);
        }

        // No classical trailer: a recovered cross-reference stream dictionary
        // can still describe the document.
        if let Some(dict) = self.top_dict.clone() {
            if self.root_validates(&dict)? {
                return Ok(dict);
            }
        }

        Err(PdfError::invalid_pdf(
            "recovery scan produced no valid trailer",
        ))
    }

    fn root_validates(&mut self, trailer: &Dict) -> PdfResult<bool> {
        let Some(root_obj) = trailer.get_raw("Root").cloned() else {
            return Ok(false);
        };
        match self.fetch_if_ref(&root_obj) {
            Ok(PdfObject::Dictionary(root)) => Ok(root.has("Pages")),
            Err(e) if e.is_data_missing() => Err(e),
            _ => Ok(false),
        }
    }

    // ========================================================================
    // Fetch
    // ========================================================================

    /// Resolves an indirect reference to its object. Free or absent entries
    /// resolve to `Null`. Results other than streams are cached; the first
    /// completed fetch fixes the value every later fetch observes.
    pub fn fetch(&mut self, r: Ref) -> PdfResult<Rc<PdfObject>> {
        self.fetch_with(r, false)
    }

    /// `fetch` with optional encryption suppression (used for metadata when
    /// the document leaves its metadata stream in the clear).
    pub fn fetch_with(&mut self, r: Ref, suppress_encryption: bool) -> PdfResult<Rc<PdfObject>> {
        if let Some(cached) = self.cache.get(&r.num) {
            return Ok(Rc::clone(cached));
        }

        let entry = match self.entries.get(r.num as usize).and_then(Option::as_ref) {
            Some(entry) => entry.clone(),
            None => {
                let null = Rc::new(PdfObject::Null);
                self.cache.put(r.num, Rc::clone(&null));
                return Ok(null);
            }
        };

        // A malformed file can make an object's location depend on the
        // object itself (e.g. an object stream whose /Length lives inside
        // one of its own members); refuse instead of recursing forever.
        if !self.pending_refs.insert(r) {
            return Err(PdfError::xref_entry(format!(
                "circular reference while fetching {}",
                r
            )));
        }
        let result = match entry {
            XRefEntry::Free { .. } => {
                let null = Rc::new(PdfObject::Null);
                self.cache.put(r.num, Rc::clone(&null));
                Ok(null)
            }
            XRefEntry::Uncompressed { offset, generation } => {
                self.fetch_uncompressed(r, offset, generation, suppress_encryption)
            }
            XRefEntry::Compressed { stream_num, index } => {
                self.fetch_compressed(r, stream_num, index)
            }
        };
        self.pending_refs.remove(&r);
        result
    }

    /// Suspending variant: a `DataMissing` failure requests the byte range
    /// and retries, so the caller never observes the condition.
    pub fn fetch_async(&mut self, r: Ref) -> PdfResult<Rc<PdfObject>> {
        loop {
            match self.fetch(r) {
                Err(PdfError::DataMissing { begin, end }) => {
                    self.stream.request_range(begin, end)?;
                }
                other => return other,
            }
        }
    }

    /// Identity on non-references.
    pub fn fetch_if_ref(&mut self, obj: &PdfObject) -> PdfResult<PdfObject> {
        match obj {
            PdfObject::Reference(r) => Ok((*self.fetch(*r)?).clone()),
            other => Ok(other.clone()),
        }
    }

    pub fn fetch_if_ref_async(&mut self, obj: &PdfObject) -> PdfResult<PdfObject> {
        match obj {
            PdfObject::Reference(r) => Ok((*self.fetch_async(*r)?).clone()),
            other => Ok(other.clone()),
        }
    }

    fn fetch_uncompressed(
        &mut self,
        r: Ref,
        offset: u64,
        entry_gen: u16,
        suppress_encryption: bool,
    ) -> PdfResult<Rc<PdfObject>> {
        if entry_gen != r.generation {
            return Err(PdfError::xref_entry(format!(
                "generation mismatch for object {}: entry has {}, requested {}",
                r.num, entry_gen, r.generation
            )));
        }
        let offset = offset as usize;
        if offset >= self.stream_len() {
            return Err(PdfError::xref_entry(format!(
                "offset {} for object {} is out of bounds",
                offset, r.num
            )));
        }

        let sub = self
            .stream
            .make_sub_stream(offset, self.stream_len() - offset)?;
        let mut parser = Parser::new(Lexer::new(sub)?, true, false)?;

        let obj1 = parser.get_obj(Some(self))?;
        let obj2 = parser.get_obj(Some(self))?;
        let obj3 = parser.get_obj(Some(self))?;

        if obj1.as_i64() != Some(r.num as i64) || obj2.as_i64() != Some(r.generation as i64) {
            return Err(PdfError::xref_entry(format!(
                "object header mismatch for {}: found {:?} {:?}",
                r, obj1, obj2
            )));
        }
        match &obj3 {
            PdfObject::Command(cmd) if cmd == "obj" => {}
            // Some generators glue the keyword and a number together
            // ("obj1234"); accept it when the suffix is numeric.
            PdfObject::Command(cmd)
                if cmd.starts_with("obj") && cmd[3..].parse::<i64>().is_ok() =>
            {
                warn!("xref: tolerating malformed object keyword {:?}", cmd);
            }
            other => {
                return Err(PdfError::xref_entry(format!(
                    "expected 'obj' keyword for {}, found {:?}",
                    r, other
                )));
            }
        }

        let mut value = parser.get_obj(Some(self))?;

        if !suppress_encryption {
            if let Some(factory) = self.cipher_factory.clone() {
                let transform = factory.create_transform(r.num, r.generation);
                decrypt_object(&mut value, transform.as_ref());
            }
        }

        match &mut value {
            PdfObject::Dictionary(dict) => dict.set_obj_id(r.obj_id()),
            PdfObject::Stream(stream) => stream.dict.set_obj_id(r.obj_id()),
            _ => {}
        }

        let rc = Rc::new(value);
        // Streams wrap file byte ranges and stay uncached.
        if !matches!(&*rc, PdfObject::Stream(_)) {
            self.cache.put(r.num, Rc::clone(&rc));
        }
        Ok(rc)
    }

    /// Fetches a member of an object stream. The container is itself an
    /// indirect object (`stream_num 0 R`) whose payload holds `N` member
    /// `(num, offset)` pairs followed by the member objects. Members are only
    /// cached when the live entry table points back at this container with
    /// the matching index, preserving the first-writer-wins rule.
    fn fetch_compressed(
        &mut self,
        r: Ref,
        stream_num: u32,
        index: u32,
    ) -> PdfResult<Rc<PdfObject>> {
        let container = self.fetch(Ref::new(stream_num, 0))?;
        let stream_obj = match &*container {
            PdfObject::Stream(stream) => stream,
            other => {
                return Err(PdfError::xref_entry(format!(
                    "object stream {} is not a stream: {:?}",
                    stream_num, other
                )));
            }
        };

        match stream_obj.dict.get_raw("Type") {
            Some(PdfObject::Name(name)) if name == "ObjStm" => {}
            _ => {
                return Err(PdfError::xref_entry(format!(
                    "object stream {} is not /Type /ObjStm",
                    stream_num
                )));
            }
        }

        let n = stream_obj
            .dict
            .get_raw("N")
            .and_then(PdfObject::as_i64)
            .filter(|n| *n >= 0)
            .ok_or_else(|| PdfError::xref_entry("object stream missing /N"))? as u32;
        let first = stream_obj
            .dict
            .get_raw("First")
            .and_then(PdfObject::as_i64)
            .filter(|f| *f >= 0)
            .ok_or_else(|| PdfError::xref_entry("object stream missing /First"))?
            as usize;

        if index >= n {
            return Err(PdfError::xref_entry(format!(
                "object index {} out of range for object stream {} with {} members",
                index, stream_num, n
            )));
        }

        let data = stream_obj.decoded_bytes()?;
        if first > data.len() {
            return Err(PdfError::xref_entry("object stream /First out of bounds"));
        }

        // Member table: N pairs of (object number, relative offset).
        let table_stream = super::stream::MemoryStream::new(data[..first].to_vec());
        let mut table_parser = Parser::new(Lexer::new(Box::new(table_stream))?, false, false)?;
        let mut member_nums = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let num = table_parser
                .get_obj(None)?
                .as_i64()
                .filter(|v| *v >= 0)
                .ok_or_else(|| PdfError::format("invalid object stream member table"))?;
            let _offset = table_parser
                .get_obj(None)?
                .as_i64()
                .ok_or_else(|| PdfError::format("invalid object stream member table"))?;
            member_nums.push(num as u32);
        }

        let body_stream = super::stream::MemoryStream::new(data[first..].to_vec());
        let mut body_parser = Parser::new(Lexer::new(Box::new(body_stream))?, false, false)?;

        let mut requested: Option<Rc<PdfObject>> = None;
        for i in 0..n {
            let mut obj = body_parser.get_obj(None)?;
            // Some writers leave a stray `endobj` between members.
            if obj.is_command("endobj") {
                obj = body_parser.get_obj(None)?;
            }
            let member_num = member_nums[i as usize];
            if let PdfObject::Dictionary(dict) = &mut obj {
                dict.set_obj_id(Ref::new(member_num, 0).obj_id());
            }
            let rc = Rc::new(obj);

            let entry_points_here = matches!(
                self.entries.get(member_num as usize).and_then(Option::as_ref),
                Some(XRefEntry::Compressed {
                    stream_num: s,
                    index: idx,
                }) if *s == stream_num && *idx == i
            );
            if entry_points_here {
                self.cache.put(member_num, Rc::clone(&rc));
            }
            if i == index {
                requested = Some(rc);
            }
        }

        if member_nums.get(index as usize) != Some(&r.num) {
            warn!(
                "xref: object stream {} member {} has number {}, expected {}",
                stream_num,
                index,
                member_nums.get(index as usize).copied().unwrap_or(0),
                r.num
            );
        }
        requested.ok_or_else(|| {
            PdfError::xref_entry(format!(
                "object stream {} has no member at index {}",
                stream_num, index
            ))
        })
    }
}

/// Recursively decrypts string and stream payloads of a fetched object.
fn decrypt_object(obj: &mut PdfObject, transform: &dyn CipherTransform) {
    match obj {
        PdfObject::String(bytes) => {
            *bytes = transform.decrypt_string(bytes);
        }
        PdfObject::Array(items) => {
            for item in items {
                decrypt_object(item, transform);
            }
        }
        PdfObject::Dictionary(dict) => {
            for value in dict.values_mut() {
                decrypt_object(value, transform);
            }
        }
        PdfObject::Stream(stream) => {
            let decrypted = transform.decrypt_stream(stream.raw_bytes());
            stream.replace_data(decrypted);
            for value in stream.dict.values_mut() {
                decrypt_object(value, transform);
            }
        }
        _ => {}
    }
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn is_ws(b: u8) -> bool {
    matches!(b, 0x00 | 0x09 | 0x0A | 0x0C | 0x0D | 0x20)
}

fn is_delim(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

fn read_byte_at(stream: &dyn BaseStream, pos: usize) -> PdfResult<Option<u8>> {
    if pos >= stream.length() {
        return Ok(None);
    }
    Ok(Some(stream.get_byte_range(pos, pos + 1)?[0]))
}

fn skip_ws_and_comments(stream: &dyn BaseStream, pos: &mut usize) -> PdfResult<()> {
    loop {
        match read_byte_at(stream, *pos)? {
            Some(b) if is_ws(b) => *pos += 1,
            Some(b'%') => {
                while let Some(b) = read_byte_at(stream, *pos)? {
                    if b == b'\n' || b == b'\r' {
                        break;
                    }
                    *pos += 1;
                }
            }
            _ => break,
        }
    }
    Ok(())
}

fn read_decimal(stream: &dyn BaseStream, pos: &mut usize) -> PdfResult<Option<u64>> {
    let mut value: u64 = 0;
    let mut digits = 0;
    while let Some(b) = read_byte_at(stream, *pos)? {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as u64);
        digits += 1;
        *pos += 1;
    }
    Ok(if digits > 0 { Some(value) } else { None })
}

/// True when `kw` starts at `pos` and is not glued to a longer token.
fn keyword_at(stream: &dyn BaseStream, pos: usize, kw: &[u8]) -> PdfResult<bool> {
    let end = pos + kw.len();
    if end > stream.length() {
        return Ok(false);
    }
    if stream.get_byte_range(pos, end)? != kw {
        return Ok(false);
    }
    match read_byte_at(stream, end)? {
        Some(b) => Ok(is_ws(b) || is_delim(b)),
        None => Ok(true),
    }
}

/// Matches `N G obj` at the start of `buf`, returning the object number,
/// generation and header length.
fn parse_obj_header(buf: &[u8]) -> Option<(u32, u16, usize)> {
    let captures = OBJ_HEADER_RE.captures(buf)?;
    let num: u32 = std::str::from_utf8(captures.get(1)?.as_bytes())
        .ok()?
        .parse()
        .ok()?;
    let generation: u64 = std::str::from_utf8(captures.get(2)?.as_bytes())
        .ok()?
        .parse()
        .ok()?;
    Some((
        num,
        generation.min(u16::MAX as u64) as u16,
        captures.get(0)?.end(),
    ))
}

/// Finds where an object body ends during the recovery scan. A nested
/// `N G obj` header before the next `endobj` means the current object lost
/// its `endobj`; the body is truncated just before the inner header.
fn find_body_end(buf: &[u8], body_start: usize) -> (usize, usize) {
    let endobj = buf[body_start..]
        .windows(b"endobj".len())
        .position(|window| window == b"endobj")
        .map(|p| body_start + p);

    let probe_end = endobj.unwrap_or(buf.len());
    if let Some(nested) = NESTED_OBJ_RE.find(&buf[body_start..probe_end]) {
        let nested_start = body_start + nested.start();
        return (nested_start, nested_start);
    }

    match endobj {
        Some(pos) => (pos, pos + b"endobj".len()),
        None => (buf.len(), buf.len()),
    }
}

/// `/XRef` followed by a non-alphabetic byte marks a cross-reference stream
/// candidate.
fn contains_xref_tag(body: &[u8]) -> bool {
    const TAG: &[u8] = b"/XRef";
    let mut search = 0;
    while let Some(hit) = body[search..]
        .windows(TAG.len())
        .position(|window| window == TAG)
    {
        let after = search + hit + TAG.len();
        match body.get(after) {
            Some(b) if b.is_ascii_alphabetic() => search = after,
            _ => return true,
        }
    }
    false
}
