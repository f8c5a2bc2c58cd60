use super::error::{PdfError, PdfResult};
use super::lexer::{Lexer, Token};
use super::primitives::{Dict, PdfObject, Ref, StreamObject};
use super::xref::XRef;
use log::warn;

/// Assembles `PdfObject`s from lexer tokens.
///
/// Maintains a two-token lookahead (`buf1`/`buf2`) so indirect references
/// (`N G R`) and stream objects (dictionary followed by `stream`) can be
/// recognized before any token is committed. With `allow_streams` the parser
/// extracts stream payloads, resolving an indirect `Length` through the
/// cross-reference table when one is supplied; `recovery_mode` relaxes the
/// payload boundary to an `endstream` scan.
pub struct Parser {
    lexer: Lexer,
    allow_streams: bool,
    recovery_mode: bool,
    buf1: Token,
    buf2: Token,
}

impl Parser {
    pub fn new(mut lexer: Lexer, allow_streams: bool, recovery_mode: bool) -> PdfResult<Self> {
        let buf1 = lexer.get_token()?;
        let buf2 = lexer.get_token()?;
        Ok(Parser {
            lexer,
            allow_streams,
            recovery_mode,
            buf1,
            buf2,
        })
    }

    /// Advances the lookahead: `buf2` moves into `buf1` and a fresh token is
    /// read into `buf2`. On error (e.g. missing data) the buffers are left
    /// untouched so a retried caller re-enters from a consistent state.
    fn shift(&mut self) -> PdfResult<()> {
        let next = self.lexer.get_token()?;
        self.buf1 = std::mem::replace(&mut self.buf2, next);
        Ok(())
    }

    /// Parses the next object. `xref` is only needed to resolve indirect
    /// stream lengths; pass `None` when parsing data that cannot contain
    /// streams (object-stream members, trailers).
    pub fn get_obj(&mut self, mut xref: Option<&mut XRef>) -> PdfResult<PdfObject> {
        match self.buf1.clone() {
            Token::ArrayStart => {
                self.shift()?;
                let mut items = Vec::new();
                loop {
                    match &self.buf1 {
                        Token::ArrayEnd => {
                            self.shift()?;
                            break;
                        }
                        Token::Eof => {
                            return Err(PdfError::format("unterminated array"));
                        }
                        _ => items.push(self.get_obj(xref.as_deref_mut())?),
                    }
                }
                Ok(PdfObject::Array(items))
            }

            Token::DictStart => {
                self.shift()?;
                let mut dict = Dict::new();
                loop {
                    match &self.buf1 {
                        Token::DictEnd => {
                            let stream_follows = self.allow_streams
                                && matches!(&self.buf2, Token::Command(cmd) if cmd == "stream");
                            if stream_follows {
                                return self.make_stream(dict, xref);
                            }
                            self.shift()?;
                            return Ok(PdfObject::Dictionary(dict));
                        }
                        Token::Eof => {
                            return Err(PdfError::format("unterminated dictionary"));
                        }
                        Token::Name(name) => {
                            let key = name.clone();
                            self.shift()?;
                            if self.buf1 == Token::DictEnd {
                                warn!("parser: dictionary key /{} has no value", key);
                                dict.insert(key, PdfObject::Null);
                                continue;
                            }
                            let value = self.get_obj(xref.as_deref_mut())?;
                            dict.insert(key, value);
                        }
                        other => {
                            warn!("parser: skipping malformed dictionary key {:?}", other);
                            self.shift()?;
                        }
                    }
                }
            }

            Token::ArrayEnd => Err(PdfError::format("unexpected ']'")),
            Token::DictEnd => Err(PdfError::format("unexpected '>>'")),

            Token::Integer(num) => {
                self.shift()?;
                if let (Token::Integer(generation), Token::Command(cmd)) = (&self.buf1, &self.buf2) {
                    if cmd == "R"
                        && num >= 0
                        && num <= u32::MAX as i64
                        && (0..=u16::MAX as i64).contains(generation)
                    {
                        let reference = Ref::new(num as u32, *generation as u16);
                        self.shift()?;
                        self.shift()?;
                        return Ok(PdfObject::Reference(reference));
                    }
                }
                Ok(PdfObject::Integer(num))
            }

            Token::Eof => Ok(PdfObject::Command("EOF".to_string())),
            Token::Real(value) => {
                self.shift()?;
                Ok(PdfObject::Real(value))
            }
            Token::Boolean(value) => {
                self.shift()?;
                Ok(PdfObject::Boolean(value))
            }
            Token::Null => {
                self.shift()?;
                Ok(PdfObject::Null)
            }
            Token::String(bytes) | Token::HexString(bytes) => {
                self.shift()?;
                Ok(PdfObject::String(bytes))
            }
            Token::Name(name) => {
                self.shift()?;
                Ok(PdfObject::Name(name))
            }
            Token::Command(cmd) => {
                self.shift()?;
                Ok(PdfObject::Command(cmd))
            }
        }
    }

    /// True once the token stream is exhausted.
    pub fn at_eof(&self) -> bool {
        self.buf1 == Token::Eof
    }

    /// Extracts a stream payload. Entered with `>>` in `buf1` and the
    /// `stream` keyword in `buf2`, i.e. before the lexer has touched the
    /// binary payload.
    fn make_stream(
        &mut self,
        dict: Dict,
        mut xref: Option<&mut XRef>,
    ) -> PdfResult<PdfObject> {
        let declared_length = match dict.get_raw("Length") {
            Some(PdfObject::Integer(n)) if *n >= 0 => Some(*n as usize),
            Some(PdfObject::Reference(r)) => match xref.as_deref_mut() {
                Some(xref) => xref.fetch(*r)?.as_i64().filter(|n| *n >= 0).map(|n| n as usize),
                None => None,
            },
            _ => None,
        };

        let data_begin = self.lexer.begin_stream_data()?;
        let stream_end = self.lexer.stream_end();

        let mut data_end = None;
        if !self.recovery_mode {
            if let Some(length) = declared_length {
                let candidate = data_begin + length;
                if candidate <= stream_end && self.endstream_follows(candidate)? {
                    data_end = Some(candidate);
                }
            }
        }

        let data_end = match data_end {
            Some(end) => end,
            None => {
                if !self.recovery_mode {
                    warn!("parser: bad or missing stream Length, scanning for endstream");
                }
                let marker = self
                    .lexer
                    .find_forward(data_begin, b"endstream")?
                    .ok_or_else(|| PdfError::format("missing endstream keyword"))?;
                trim_payload_eol(&self.lexer, data_begin, marker)?
            }
        };

        let data = self.lexer.read_range(data_begin, data_end)?;

        // Re-seat the lexer after the payload and rebuild the lookahead.
        self.lexer.resume_at(data_end)?;
        self.buf1 = self.lexer.get_token()?;
        self.buf2 = self.lexer.get_token()?;
        if matches!(&self.buf1, Token::Command(cmd) if cmd == "endstream") {
            self.shift()?;
        } else {
            warn!("parser: endstream keyword missing after stream payload");
        }

        Ok(PdfObject::Stream(StreamObject::new(
            dict, data, data_begin, data_end,
        )))
    }

    /// Checks that (possibly whitespace-prefixed) `endstream` starts at `pos`.
    fn endstream_follows(&self, pos: usize) -> PdfResult<bool> {
        const KEYWORD: &[u8] = b"endstream";
        let probe_end = (pos + KEYWORD.len() + 4).min(self.lexer.stream_end());
        if pos >= probe_end {
            return Ok(false);
        }
        let probe = self.lexer.read_range(pos, probe_end)?;
        let skipped = probe
            .iter()
            .take_while(|b| matches!(b, 0x00 | 0x09 | 0x0A | 0x0C | 0x0D | 0x20))
            .count();
        Ok(probe[skipped..].starts_with(KEYWORD))
    }
}

/// Drops the single EOL that separates the payload from `endstream`.
fn trim_payload_eol(lexer: &Lexer, begin: usize, marker: usize) -> PdfResult<usize> {
    let mut end = marker;
    if end > begin {
        let tail = lexer.read_range(end - 1, end)?;
        if tail[0] == b'\n' {
            end -= 1;
        }
    }
    if end > begin {
        let tail = lexer.read_range(end - 1, end)?;
        if tail[0] == b'\r' {
            end -= 1;
        }
    }
    Ok(end)
}
