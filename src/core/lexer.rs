use super::base_stream::BaseStream;
use super::error::{PdfError, PdfResult};
use log::warn;

/// Tokens produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Eof,
    Boolean(bool),
    Null,
    Integer(i64),
    Real(f64),
    /// Literal string `(...)`
    String(Vec<u8>),
    /// Hex string `<...>`
    HexString(Vec<u8>),
    /// `/Name`
    Name(String),
    /// Keyword or operator (`obj`, `endobj`, `R`, `trailer`, ...)
    Command(String),
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
}

/// Tokenizer over a byte store.
///
/// Keeps a one-character lookahead. End of stream becomes the `Eof` token,
/// while `DataMissing` from a progressive store propagates so the caller can
/// fetch the range and re-lex from a checkpoint.
pub struct Lexer {
    stream: Box<dyn BaseStream>,
    current: i32,
}

impl Lexer {
    pub fn new(mut stream: Box<dyn BaseStream>) -> PdfResult<Self> {
        let current = Self::read_char(&mut stream)?;
        Ok(Lexer { stream, current })
    }

    /// Reads the next character, mapping end-of-stream to -1.
    fn read_char(stream: &mut Box<dyn BaseStream>) -> PdfResult<i32> {
        match stream.get_byte() {
            Ok(byte) => Ok(byte as i32),
            Err(PdfError::UnexpectedEof) => Ok(-1),
            Err(e) => Err(e),
        }
    }

    fn next_char(&mut self) -> PdfResult<i32> {
        self.current = Self::read_char(&mut self.stream)?;
        Ok(self.current)
    }

    /// Absolute position of the lookahead character.
    pub fn pos(&self) -> usize {
        if self.current < 0 {
            self.stream.pos()
        } else {
            self.stream.pos() - 1
        }
    }

    /// Absolute end of the underlying stream window.
    pub fn stream_end(&self) -> usize {
        self.stream.start() + self.stream.length()
    }

    /// Re-seats the lexer at an absolute position.
    pub fn resume_at(&mut self, pos: usize) -> PdfResult<()> {
        self.stream.set_pos(pos)?;
        self.current = Self::read_char(&mut self.stream)?;
        Ok(())
    }

    /// Position-independent raw read, used for stream payload extraction.
    pub fn read_range(&self, begin: usize, end: usize) -> PdfResult<Vec<u8>> {
        self.stream.get_byte_range(begin, end)
    }

    /// Scans forward from `from` for the next occurrence of `needle`.
    pub fn find_forward(&self, from: usize, needle: &[u8]) -> PdfResult<Option<usize>> {
        const BLOCK: usize = 2048;
        let end = self.stream_end();
        if needle.is_empty() || from >= end {
            return Ok(None);
        }
        let mut begin = from;
        while begin < end {
            let block_end = (begin + BLOCK + needle.len() - 1).min(end);
            let block = self.stream.get_byte_range(begin, block_end)?;
            if let Some(hit) = block
                .windows(needle.len())
                .position(|window| window == needle)
            {
                return Ok(Some(begin + hit));
            }
            if block_end == end {
                break;
            }
            begin += BLOCK;
        }
        Ok(None)
    }

    /// PDF whitespace: NUL, TAB, LF, FF, CR, SPACE
    fn is_whitespace(ch: i32) -> bool {
        matches!(ch, 0x00 | 0x09 | 0x0A | 0x0C | 0x0D | 0x20)
    }

    /// PDF delimiters: ( ) < > [ ] { } / %
    fn is_delimiter(ch: i32) -> bool {
        matches!(
            ch,
            0x28 | 0x29 | 0x3C | 0x3E | 0x5B | 0x5D | 0x7B | 0x7D | 0x2F | 0x25
        )
    }

    fn is_special(ch: i32) -> bool {
        Self::is_whitespace(ch) || Self::is_delimiter(ch)
    }

    fn skip_whitespace_and_comments(&mut self) -> PdfResult<()> {
        let mut in_comment = false;
        loop {
            let ch = self.current;
            if ch < 0 {
                break;
            }
            if in_comment {
                if ch == 0x0A || ch == 0x0D {
                    in_comment = false;
                }
            } else if ch == 0x25 {
                in_comment = true;
            } else if !Self::is_whitespace(ch) {
                break;
            }
            self.next_char()?;
        }
        Ok(())
    }

    /// Skips the rest of the current line; used for the EOL that the
    /// `stream` keyword requires before its payload. Returns the absolute
    /// offset of the first payload byte.
    pub fn begin_stream_data(&mut self) -> PdfResult<usize> {
        loop {
            match self.current {
                -1 => break,
                0x0D => {
                    if self.next_char()? == 0x0A {
                        self.next_char()?;
                    }
                    break;
                }
                0x0A => {
                    self.next_char()?;
                    break;
                }
                _ => {
                    self.next_char()?;
                }
            }
        }
        Ok(self.pos())
    }

    /// Produces the next token.
    pub fn get_token(&mut self) -> PdfResult<Token> {
        self.skip_whitespace_and_comments()?;
        let ch = self.current;

        if ch < 0 {
            return Ok(Token::Eof);
        }

        match ch {
            0x30..=0x39 | 0x2B | 0x2D | 0x2E => self.get_number(),
            0x28 => self.get_literal_string(),
            0x2F => self.get_name(),
            0x5B => {
                self.next_char()?;
                Ok(Token::ArrayStart)
            }
            0x5D => {
                self.next_char()?;
                Ok(Token::ArrayEnd)
            }
            0x3C => {
                if self.next_char()? == 0x3C {
                    self.next_char()?;
                    Ok(Token::DictStart)
                } else {
                    self.get_hex_string()
                }
            }
            0x3E => {
                if self.next_char()? == 0x3E {
                    self.next_char()?;
                    Ok(Token::DictEnd)
                } else {
                    Err(PdfError::format("unexpected '>'"))
                }
            }
            0x29 => {
                warn!("lexer: skipping stray ')'");
                self.next_char()?;
                self.get_token()
            }
            0x7B => {
                self.next_char()?;
                Ok(Token::Command("{".to_string()))
            }
            0x7D => {
                self.next_char()?;
                Ok(Token::Command("}".to_string()))
            }
            _ => self.get_command(),
        }
    }

    fn get_number(&mut self) -> PdfResult<Token> {
        let mut buf = Vec::new();
        let mut seen_dot = false;

        if self.current == 0x2B || self.current == 0x2D {
            buf.push(self.current as u8);
            self.next_char()?;
        }
        loop {
            let ch = self.current;
            if (0x30..=0x39).contains(&ch) {
                buf.push(ch as u8);
            } else if ch == 0x2E && !seen_dot {
                seen_dot = true;
                buf.push(b'.');
            } else {
                break;
            }
            self.next_char()?;
        }

        let text = String::from_utf8_lossy(&buf);
        if seen_dot {
            let value: f64 = text
                .parse()
                .map_err(|_| PdfError::format(format!("invalid number: {}", text)))?;
            Ok(Token::Real(value))
        } else {
            match text.parse::<i64>() {
                Ok(value) => Ok(Token::Integer(value)),
                // Out-of-range integers degrade to reals.
                Err(_) => {
                    let value: f64 = text
                        .parse()
                        .map_err(|_| PdfError::format(format!("invalid number: {}", text)))?;
                    Ok(Token::Real(value))
                }
            }
        }
    }

    fn get_literal_string(&mut self) -> PdfResult<Token> {
        let mut buf = Vec::new();
        let mut depth = 1;
        self.next_char()?;

        loop {
            let ch = self.current;
            match ch {
                -1 => {
                    warn!("lexer: unterminated literal string");
                    break;
                }
                0x28 => {
                    depth += 1;
                    buf.push(b'(');
                    self.next_char()?;
                }
                0x29 => {
                    depth -= 1;
                    self.next_char()?;
                    if depth == 0 {
                        break;
                    }
                    buf.push(b')');
                }
                0x5C => {
                    let esc = self.next_char()?;
                    match esc {
                        -1 => {
                            warn!("lexer: unterminated escape in literal string");
                            break;
                        }
                        0x6E => {
                            buf.push(b'\n');
                            self.next_char()?;
                        }
                        0x72 => {
                            buf.push(b'\r');
                            self.next_char()?;
                        }
                        0x74 => {
                            buf.push(b'\t');
                            self.next_char()?;
                        }
                        0x62 => {
                            buf.push(0x08);
                            self.next_char()?;
                        }
                        0x66 => {
                            buf.push(0x0C);
                            self.next_char()?;
                        }
                        0x28 | 0x29 | 0x5C => {
                            buf.push(esc as u8);
                            self.next_char()?;
                        }
                        0x30..=0x37 => {
                            let mut value = 0u16;
                            let mut digits = 0;
                            while digits < 3 && (0x30..=0x37).contains(&self.current) {
                                value = value * 8 + (self.current - 0x30) as u16;
                                digits += 1;
                                self.next_char()?;
                            }
                            buf.push((value & 0xFF) as u8);
                        }
                        // Escaped EOL is a line continuation.
                        0x0D => {
                            if self.next_char()? == 0x0A {
                                self.next_char()?;
                            }
                        }
                        0x0A => {
                            self.next_char()?;
                        }
                        _ => {
                            buf.push(esc as u8);
                            self.next_char()?;
                        }
                    }
                }
                // Unescaped EOLs normalize to LF.
                0x0D => {
                    if self.next_char()? == 0x0A {
                        self.next_char()?;
                    }
                    buf.push(b'\n');
                }
                _ => {
                    buf.push(ch as u8);
                    self.next_char()?;
                }
            }
        }

        Ok(Token::String(buf))
    }

    fn get_name(&mut self) -> PdfResult<Token> {
        let mut buf = Vec::new();
        self.next_char()?;

        while self.current >= 0 && !Self::is_special(self.current) {
            if self.current == 0x23 {
                let h1 = self.next_char()?;
                let Some(d1) = hex_digit(h1) else {
                    warn!("lexer: '#' in name not followed by hex digits");
                    buf.push(b'#');
                    continue;
                };
                let h2 = self.next_char()?;
                let Some(d2) = hex_digit(h2) else {
                    warn!("lexer: truncated '#' escape in name");
                    buf.push(b'#');
                    buf.push(h1 as u8);
                    continue;
                };
                buf.push(d1 << 4 | d2);
                self.next_char()?;
            } else {
                buf.push(self.current as u8);
                self.next_char()?;
            }
        }

        Ok(Token::Name(String::from_utf8_lossy(&buf).into_owned()))
    }

    fn get_hex_string(&mut self) -> PdfResult<Token> {
        let mut buf = Vec::new();
        let mut pending: Option<u8> = None;

        loop {
            let ch = self.current;
            if ch < 0 {
                warn!("lexer: unterminated hex string");
                break;
            }
            if ch == 0x3E {
                self.next_char()?;
                break;
            }
            if Self::is_whitespace(ch) {
                self.next_char()?;
                continue;
            }
            match hex_digit(ch) {
                Some(digit) => {
                    match pending.take() {
                        Some(high) => buf.push(high << 4 | digit),
                        None => pending = Some(digit),
                    }
                    self.next_char()?;
                }
                None => {
                    warn!("lexer: skipping invalid character in hex string");
                    self.next_char()?;
                }
            }
        }

        // An odd trailing digit gets a zero low nibble.
        if let Some(high) = pending {
            buf.push(high << 4);
        }

        Ok(Token::HexString(buf))
    }

    fn get_command(&mut self) -> PdfResult<Token> {
        let mut buf = String::new();
        while self.current >= 0 && !Self::is_special(self.current) {
            buf.push(self.current as u8 as char);
            self.next_char()?;
            if buf.len() > 127 {
                return Err(PdfError::format("command token too long"));
            }
        }
        if buf.is_empty() {
            // A delimiter we do not handle; consume it to guarantee progress.
            let ch = self.current;
            self.next_char()?;
            return Err(PdfError::format(format!(
                "unexpected character: 0x{:02x}",
                ch
            )));
        }

        Ok(match buf.as_str() {
            "true" => Token::Boolean(true),
            "false" => Token::Boolean(false),
            "null" => Token::Null,
            _ => Token::Command(buf),
        })
    }
}

fn hex_digit(ch: i32) -> Option<u8> {
    match ch {
        0x30..=0x39 => Some((ch - 0x30) as u8),
        0x41..=0x46 => Some((ch - 0x41 + 10) as u8),
        0x61..=0x66 => Some((ch - 0x61 + 10) as u8),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream::MemoryStream;

    fn lex(input: &[u8]) -> Vec<Token> {
        let mut lexer = Lexer::new(Box::new(MemoryStream::new(input.to_vec()))).unwrap();
        let mut tokens = Vec::new();
        loop {
            let token = lexer.get_token().unwrap();
            if token == Token::Eof {
                break;
            }
            tokens.push(token);
        }
        tokens
    }

    #[test]
    fn test_numbers() {
        assert_eq!(lex(b"42"), vec![Token::Integer(42)]);
        assert_eq!(lex(b"-17"), vec![Token::Integer(-17)]);
        assert_eq!(lex(b"3.14"), vec![Token::Real(3.14)]);
        assert_eq!(lex(b".5"), vec![Token::Real(0.5)]);
        assert_eq!(lex(b"+2"), vec![Token::Integer(2)]);
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            lex(b"true false null obj"),
            vec![
                Token::Boolean(true),
                Token::Boolean(false),
                Token::Null,
                Token::Command("obj".to_string()),
            ]
        );
    }

    #[test]
    fn test_literal_string_escapes() {
        assert_eq!(lex(b"(hello)"), vec![Token::String(b"hello".to_vec())]);
        assert_eq!(
            lex(b"(a\\(b\\)c)"),
            vec![Token::String(b"a(b)c".to_vec())]
        );
        assert_eq!(lex(b"(a(n)b)"), vec![Token::String(b"a(n)b".to_vec())]);
        assert_eq!(lex(b"(\\101)"), vec![Token::String(b"A".to_vec())]);
        assert_eq!(lex(b"(a\\\nb)"), vec![Token::String(b"ab".to_vec())]);
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(
            lex(b"<48 65 6C6C 6F>"),
            vec![Token::HexString(b"Hello".to_vec())]
        );
        // Odd digit count pads with zero.
        assert_eq!(lex(b"<41 4>"), vec![Token::HexString(vec![0x41, 0x40])]);
    }

    #[test]
    fn test_names() {
        assert_eq!(lex(b"/Type"), vec![Token::Name("Type".to_string())]);
        assert_eq!(lex(b"/A#42"), vec![Token::Name("AB".to_string())]);
    }

    #[test]
    fn test_structural_tokens() {
        assert_eq!(
            lex(b"[<<>>]"),
            vec![
                Token::ArrayStart,
                Token::DictStart,
                Token::DictEnd,
                Token::ArrayEnd,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            lex(b"1 % a comment\n2"),
            vec![Token::Integer(1), Token::Integer(2)]
        );
    }

    #[test]
    fn test_find_forward() {
        let lexer = Lexer::new(Box::new(MemoryStream::new(
            b"some bytes endstream tail".to_vec(),
        )))
        .unwrap();
        assert_eq!(lexer.find_forward(0, b"endstream").unwrap(), Some(11));
        assert_eq!(lexer.find_forward(12, b"endstream").unwrap(), None);
    }
}
