use super::base_stream::BaseStream;
use super::error::{PdfError, PdfResult};
use rustc_hash::FxHashSet;
use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::rc::Rc;

/// Default chunk size: 64KB
pub const DEFAULT_CHUNK_SIZE: usize = 65536;

/// Source of byte ranges for a progressively-loaded document.
///
/// The loader is the seam towards the host's transport (disk seek, HTTP range
/// request, ...). `load` must return exactly `end - begin` bytes.
pub trait RangeLoader {
    /// Total length of the document in bytes.
    fn total_length(&self) -> usize;

    /// Delivers the bytes in `begin..end`.
    fn load(&mut self, begin: usize, end: usize) -> PdfResult<Vec<u8>>;
}

/// Chunk-granular delivery table shared by a stream and its sub-streams.
struct ChunkTable {
    buf: Vec<u8>,
    loaded: FxHashSet<usize>,
    chunk_size: usize,
    num_chunks: usize,
    loader: Box<dyn RangeLoader>,
}

impl ChunkTable {
    fn chunk_span(&self, chunk: usize) -> (usize, usize) {
        let begin = chunk * self.chunk_size;
        let end = ((chunk + 1) * self.chunk_size).min(self.buf.len());
        (begin, end)
    }

    /// Chunk-aligned span covering every undelivered chunk in `begin..end`,
    /// or `None` when the range is fully resident.
    fn missing_span(&self, begin: usize, end: usize) -> Option<(usize, usize)> {
        if begin >= end {
            return None;
        }
        let first_chunk = begin / self.chunk_size;
        let last_chunk = (end - 1) / self.chunk_size;
        let mut missing = (first_chunk..=last_chunk).filter(|c| !self.loaded.contains(c));
        let lo = missing.next()?;
        let hi = missing.last().unwrap_or(lo);
        Some((self.chunk_span(lo).0, self.chunk_span(hi).1))
    }

    fn request_range(&mut self, begin: usize, end: usize) -> PdfResult<()> {
        if begin >= end {
            return Ok(());
        }
        let first_chunk = begin / self.chunk_size;
        let last_chunk = ((end - 1) / self.chunk_size).min(self.num_chunks.saturating_sub(1));
        for chunk in first_chunk..=last_chunk {
            if self.loaded.contains(&chunk) {
                continue;
            }
            let (chunk_begin, chunk_end) = self.chunk_span(chunk);
            let data = self.loader.load(chunk_begin, chunk_end)?;
            if data.len() != chunk_end - chunk_begin {
                return Err(PdfError::Io(format!(
                    "range loader returned {} bytes for {}..{}",
                    data.len(),
                    chunk_begin,
                    chunk_end
                )));
            }
            self.buf[chunk_begin..chunk_end].copy_from_slice(&data);
            self.loaded.insert(chunk);
        }
        Ok(())
    }
}

/// Progressively-loaded byte store.
///
/// Bytes arrive in fixed-size chunks through a `RangeLoader`. Reading a byte
/// whose chunk has not been delivered fails with `PdfError::DataMissing`
/// carrying the chunk-aligned span; callers request the range and retry.
/// Sub-streams are views sharing the same chunk table, so a range delivered
/// through any of them is visible to all.
pub struct ChunkedStream {
    table: Rc<RefCell<ChunkTable>>,
    pos: usize,
    start: usize,
    length: usize,
}

impl ChunkedStream {
    pub fn new(loader: Box<dyn RangeLoader>, chunk_size: Option<usize>) -> Self {
        let chunk_size = chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        let total = loader.total_length();
        let num_chunks = total.div_ceil(chunk_size);
        let table = ChunkTable {
            buf: vec![0; total],
            loaded: FxHashSet::default(),
            chunk_size,
            num_chunks,
            loader,
        };
        ChunkedStream {
            table: Rc::new(RefCell::new(table)),
            pos: 0,
            start: 0,
            length: total,
        }
    }

    fn end(&self) -> usize {
        self.start + self.length
    }
}

impl BaseStream for ChunkedStream {
    fn length(&self) -> usize {
        self.length
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn start(&self) -> usize {
        self.start
    }

    fn set_pos(&mut self, pos: usize) -> PdfResult<()> {
        if pos > self.end() {
            return Err(PdfError::InvalidPosition {
                pos,
                length: self.length,
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn get_byte(&mut self) -> PdfResult<u8> {
        if self.pos >= self.end() {
            return Err(PdfError::UnexpectedEof);
        }
        let table = self.table.borrow();
        if let Some((begin, end)) = table.missing_span(self.pos, self.pos + 1) {
            return Err(PdfError::DataMissing { begin, end });
        }
        let byte = table.buf[self.pos];
        drop(table);
        self.pos += 1;
        Ok(byte)
    }

    fn get_bytes(&mut self, length: usize) -> PdfResult<Vec<u8>> {
        let end = self.pos + length;
        if end > self.end() {
            return Err(PdfError::UnexpectedEof);
        }
        let table = self.table.borrow();
        if let Some((begin, end)) = table.missing_span(self.pos, end) {
            return Err(PdfError::DataMissing { begin, end });
        }
        let bytes = table.buf[self.pos..end].to_vec();
        drop(table);
        self.pos = end;
        Ok(bytes)
    }

    fn get_byte_range(&self, begin: usize, end: usize) -> PdfResult<Vec<u8>> {
        if begin > end || end > self.table.borrow().buf.len() {
            return Err(PdfError::InvalidRange { begin, end });
        }
        let table = self.table.borrow();
        if let Some((begin, end)) = table.missing_span(begin, end) {
            return Err(PdfError::DataMissing { begin, end });
        }
        Ok(table.buf[begin..end].to_vec())
    }

    fn make_sub_stream(&self, start: usize, length: usize) -> PdfResult<Box<dyn BaseStream>> {
        if start + length > self.table.borrow().buf.len() {
            return Err(PdfError::InvalidRange {
                begin: start,
                end: start + length,
            });
        }
        Ok(Box::new(ChunkedStream {
            table: Rc::clone(&self.table),
            pos: start,
            start,
            length,
        }))
    }

    fn is_data_loaded(&self) -> bool {
        self.table.borrow().missing_span(self.start, self.end()).is_none()
    }

    fn missing_ranges(&self) -> Vec<(usize, usize)> {
        let table = self.table.borrow();
        if self.length == 0 {
            return Vec::new();
        }
        let first_chunk = self.start / table.chunk_size;
        let last_chunk = (self.end() - 1) / table.chunk_size;
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for chunk in first_chunk..=last_chunk {
            if table.loaded.contains(&chunk) {
                continue;
            }
            let (begin, end) = table.chunk_span(chunk);
            match ranges.last_mut() {
                Some(last) if last.1 == begin => last.1 = end,
                _ => ranges.push((begin, end)),
            }
        }
        ranges
    }

    fn request_range(&mut self, begin: usize, end: usize) -> PdfResult<()> {
        self.table.borrow_mut().request_range(begin, end)
    }
}

/// Loads byte ranges by seeking within a file on disk.
pub struct FileRangeLoader {
    file: File,
    length: usize,
}

impl FileRangeLoader {
    pub fn open<P: AsRef<Path>>(path: P) -> PdfResult<Self> {
        let mut file = File::open(path).map_err(|e| PdfError::Io(e.to_string()))?;
        let length = file
            .seek(SeekFrom::End(0))
            .map_err(|e| PdfError::Io(e.to_string()))? as usize;
        Ok(FileRangeLoader { file, length })
    }
}

impl RangeLoader for FileRangeLoader {
    fn total_length(&self) -> usize {
        self.length
    }

    fn load(&mut self, begin: usize, end: usize) -> PdfResult<Vec<u8>> {
        self.file
            .seek(SeekFrom::Start(begin as u64))
            .map_err(|e| PdfError::Io(e.to_string()))?;
        let mut buffer = vec![0u8; end - begin];
        self.file
            .read_exact(&mut buffer)
            .map_err(|e| PdfError::Io(e.to_string()))?;
        Ok(buffer)
    }
}

/// In-memory loader that hands out ranges on demand, simulating a transport
/// that delivers the document piecewise. Counts delivered requests so tests
/// can assert progressive behavior.
pub struct MemoryRangeLoader {
    bytes: Vec<u8>,
    requests: Rc<Cell<usize>>,
}

impl MemoryRangeLoader {
    pub fn new(bytes: Vec<u8>) -> Self {
        MemoryRangeLoader {
            bytes,
            requests: Rc::new(Cell::new(0)),
        }
    }

    /// Shared counter of `load` calls made through this loader.
    pub fn request_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.requests)
    }
}

impl RangeLoader for MemoryRangeLoader {
    fn total_length(&self) -> usize {
        self.bytes.len()
    }

    fn load(&mut self, begin: usize, end: usize) -> PdfResult<Vec<u8>> {
        if end > self.bytes.len() {
            return Err(PdfError::InvalidRange { begin, end });
        }
        self.requests.set(self.requests.get() + 1);
        Ok(self.bytes[begin..end].to_vec())
    }
}
