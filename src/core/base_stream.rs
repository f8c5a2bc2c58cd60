use super::error::PdfResult;

/// Base trait for all byte stores the resolver reads from.
///
/// Implementations provide random access over PDF bytes from memory, disk or
/// a progressive loader. Streams that load progressively report undelivered
/// regions through `missing_ranges` and fail byte access into such a region
/// with `PdfError::DataMissing`; the caller requests the range and retries.
pub trait BaseStream {
    /// Total length of the accessible data in bytes.
    fn length(&self) -> usize;

    /// Current read position (absolute, within the underlying buffer).
    fn pos(&self) -> usize;

    /// Starting offset of this stream's window.
    fn start(&self) -> usize;

    /// Sets the current read position.
    fn set_pos(&mut self, pos: usize) -> PdfResult<()>;

    /// Reads one byte, advancing the position.
    fn get_byte(&mut self) -> PdfResult<u8>;

    /// Reads `length` bytes, advancing the position.
    fn get_bytes(&mut self, length: usize) -> PdfResult<Vec<u8>>;

    /// Returns `begin..end` without changing the current position.
    fn get_byte_range(&self, begin: usize, end: usize) -> PdfResult<Vec<u8>>;

    /// Creates an independent sub-stream over `start..start + length`.
    fn make_sub_stream(&self, start: usize, length: usize) -> PdfResult<Box<dyn BaseStream>>;

    fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Reads one byte without advancing the position.
    fn peek_byte(&mut self) -> PdfResult<u8> {
        let pos = self.pos();
        let byte = self.get_byte()?;
        self.set_pos(pos)?;
        Ok(byte)
    }

    /// Rewinds to the start of the stream window.
    fn reset(&mut self) -> PdfResult<()> {
        self.set_pos(self.start())
    }

    /// Advances the position by `n` bytes.
    fn skip(&mut self, n: usize) -> PdfResult<()> {
        self.set_pos(self.pos() + n)
    }

    // ========================================================================
    // Progressive loading surface. Fully-resident streams keep the defaults.
    // ========================================================================

    /// True once every byte of this stream's window has been delivered.
    fn is_data_loaded(&self) -> bool {
        true
    }

    /// Undelivered byte ranges within this stream's window, coalesced.
    fn missing_ranges(&self) -> Vec<(usize, usize)> {
        Vec::new()
    }

    /// Asks the underlying loader to deliver `begin..end`.
    fn request_range(&mut self, _begin: usize, _end: usize) -> PdfResult<()> {
        Ok(())
    }

    /// Batch variant of `request_range`.
    fn request_ranges(&mut self, ranges: &[(usize, usize)]) -> PdfResult<()> {
        for &(begin, end) in ranges {
            self.request_range(begin, end)?;
        }
        Ok(())
    }
}
