//! Decoder for `Transfer-Encoding: chunked` bodies, see
//! [RFC 9112 section 7.1](https://www.rfc-editor.org/rfc/rfc9112#section-7.1).
//!
//! Chunk extensions and trailer fields are validated for shape and dropped.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
    remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// first hex digit of a chunk size
    SizeStart,
    Size,
    /// whitespace between the size and `;` or CR
    SizeWs,
    Extension,
    SizeLf,
    Data,
    DataCr,
    DataLf,
    /// start of a trailer line, or the final CRLF
    TrailerStart,
    Trailer,
    TrailerLf,
    EndLf,
    Done,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::SizeStart, remaining: 0 }
    }

    fn step(&mut self, byte: u8) -> Result<State, ParseError> {
        use State::*;

        let next = match (self.state, byte) {
            (SizeStart, b) if b.is_ascii_hexdigit() => {
                self.remaining = hex_value(b);
                Size
            }
            (Size, b) if b.is_ascii_hexdigit() => {
                self.remaining = self
                    .remaining
                    .checked_mul(16)
                    .and_then(|size| size.checked_add(hex_value(b)))
                    .ok_or_else(|| ParseError::invalid_body("chunk size overflows u64"))?;
                Size
            }
            (Size | SizeWs, b'\t' | b' ') => SizeWs,
            (Size | SizeWs, b';') => Extension,
            (Size | SizeWs | Extension, b'\r') => SizeLf,
            (Extension, b'\n') => return Err(ParseError::invalid_body("chunk extension contains a bare LF")),
            (Extension, _) => Extension,
            (SizeLf, b'\n') if self.remaining == 0 => TrailerStart,
            (SizeLf, b'\n') => Data,
            (DataCr, b'\r') => DataLf,
            (DataLf, b'\n') => SizeStart,
            (TrailerStart, b'\r') => EndLf,
            (Trailer, b'\r') => TrailerLf,
            (TrailerStart | Trailer, _) => Trailer,
            (TrailerLf, b'\n') => TrailerStart,
            (EndLf, b'\n') => Done,
            (state, b) => {
                return Err(ParseError::invalid_body(format!("unexpected byte {b:#04x} in chunked body while in {state:?}")));
            }
        };
        Ok(next)
    }
}

fn hex_value(b: u8) -> u64 {
    match b {
        b'0'..=b'9' => (b - b'0') as u64,
        b'a'..=b'f' => (b - b'a' + 10) as u64,
        _ => (b - b'A' + 10) as u64,
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Done => {
                    trace!("finished reading chunked data");
                    return Ok(Some(PayloadItem::Eof));
                }
                State::Data => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let len = self.remaining.min(src.len() as u64) as usize;
                    self.remaining -= len as u64;
                    if self.remaining == 0 {
                        self.state = State::DataCr;
                    }
                    trace!(len, "read chunked bytes");
                    return Ok(Some(PayloadItem::Chunk(src.split_to(len).freeze())));
                }
                _ => {}
            }

            if src.is_empty() {
                return Ok(None);
            }
            let byte = src.get_u8();
            self.state = self.step(byte)?;
        }
    }
}
