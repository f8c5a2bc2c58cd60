use super::base_stream::BaseStream;
use super::error::{PdfError, PdfResult};
use std::sync::Arc;

/// Fully-resident byte store.
///
/// The buffer is shared via `Arc`, so sub-streams are zero-copy views onto
/// the same bytes with their own position and window.
pub struct MemoryStream {
    bytes: Arc<Vec<u8>>,
    pos: usize,
    start: usize,
    length: usize,
}

impl MemoryStream {
    pub fn new(bytes: Vec<u8>) -> Self {
        let length = bytes.len();
        MemoryStream {
            bytes: Arc::new(bytes),
            pos: 0,
            start: 0,
            length,
        }
    }

    fn view(bytes: Arc<Vec<u8>>, start: usize, length: usize) -> Self {
        MemoryStream {
            bytes,
            pos: start,
            start,
            length,
        }
    }

    fn end(&self) -> usize {
        self.start + self.length
    }
}

impl BaseStream for MemoryStream {
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
        let byte = self.bytes[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn get_bytes(&mut self, length: usize) -> PdfResult<Vec<u8>> {
        let end = self.pos + length;
        if end > self.end() {
            return Err(PdfError::UnexpectedEof);
        }
        let bytes = self.bytes[self.pos..end].to_vec();
        self.pos = end;
        Ok(bytes)
    }

    fn get_byte_range(&self, begin: usize, end: usize) -> PdfResult<Vec<u8>> {
        if begin > end || end > self.end() {
            return Err(PdfError::InvalidRange { begin, end });
        }
        Ok(self.bytes[begin..end].to_vec())
    }

    fn make_sub_stream(&self, start: usize, length: usize) -> PdfResult<Box<dyn BaseStream>> {
        if start + length > self.end() {
            return Err(PdfError::InvalidRange {
                begin: start,
                end: start + length,
            });
        }
        Ok(Box::new(MemoryStream::view(
            Arc::clone(&self.bytes),
            start,
            length,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_reads() {
        let mut stream = MemoryStream::new(vec![10, 20, 30, 40, 50]);
        assert_eq!(stream.length(), 5);
        assert_eq!(stream.get_byte().unwrap(), 10);
        assert_eq!(stream.get_bytes(2).unwrap(), vec![20, 30]);
        assert_eq!(stream.pos(), 3);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let mut stream = MemoryStream::new(vec![1, 2, 3]);
        assert_eq!(stream.peek_byte().unwrap(), 1);
        assert_eq!(stream.pos(), 0);
        assert_eq!(stream.get_byte().unwrap(), 1);
    }

    #[test]
    fn test_byte_range_is_positionless() {
        let mut stream = MemoryStream::new((0..10).collect());
        stream.skip(4).unwrap();
        assert_eq!(stream.get_byte_range(1, 4).unwrap(), vec![1, 2, 3]);
        assert_eq!(stream.pos(), 4);
    }

    #[test]
    fn test_eof() {
        let mut stream = MemoryStream::new(vec![1]);
        stream.get_byte().unwrap();
        assert!(matches!(stream.get_byte(), Err(PdfError::UnexpectedEof)));
    }

    #[test]
    fn test_sub_stream_shares_buffer() {
        let stream = MemoryStream::new((0..10).collect());
        let mut sub = stream.make_sub_stream(2, 4).unwrap();
        assert_eq!(sub.length(), 4);
        assert_eq!(sub.start(), 2);
        assert_eq!(sub.get_byte().unwrap(), 2);
        assert_eq!(Arc::strong_count(&stream.bytes), 2);
    }

    #[test]
    fn test_sub_stream_out_of_bounds() {
        let stream = MemoryStream::new(vec![0; 8]);
        assert!(stream.make_sub_stream(6, 4).is_err());
    }
}
