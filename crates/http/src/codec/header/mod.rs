//! Head (start line + header section) encoders and decoders.
//!
//! - [`RequestHeadDecoder`] / [`ResponseHeadEncoder`]: server side
//! - [`RequestHeadEncoder`] / [`ResponseHeadDecoder`]: client side
//!
//! Decoders parse with `httparse` and then build the `http` types without
//! copying header bytes: the parsed name/value positions are recorded first,
//! the head is split off the read buffer, and values are sliced out of it.

mod request_head_decoder;
mod request_head_encoder;
mod response_head_decoder;
mod response_head_encoder;

pub use request_head_decoder::RequestHeadDecoder;
pub use request_head_encoder::RequestHeadEncoder;
pub use response_head_decoder::ResponseHeadDecoder;
pub use response_head_encoder::ResponseHeadEncoder;

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Version};

use crate::protocol::{ParseError, PayloadSize};

/// Limits applied while decoding a head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLimits {
    max_header_num: usize,
    max_header_bytes: usize,
}

impl Default for HeaderLimits {
    fn default() -> Self {
        Self { max_header_num: 64, max_header_bytes: 8 * 1024 }
    }
}

impl HeaderLimits {
    pub fn new(max_header_num: usize, max_header_bytes: usize) -> Self {
        Self { max_header_num: max_header_num.max(1), max_header_bytes: max_header_bytes.max(16) }
    }

    pub fn max_header_num(&self) -> usize {
        self.max_header_num
    }

    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }
}

/// Byte ranges of one header's name and value inside the head buffer.
#[derive(Clone, Copy)]
struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

impl HeaderIndex {
    fn record(bytes: &[u8], headers: &[httparse::Header<'_>]) -> Vec<HeaderIndex> {
        let bytes_ptr = bytes.as_ptr() as usize;
        headers
            .iter()
            .map(|header| {
                let name_start = header.name.as_ptr() as usize - bytes_ptr;
                let value_start = header.value.as_ptr() as usize - bytes_ptr;
                HeaderIndex {
                    name: (name_start, name_start + header.name.len()),
                    value: (value_start, value_start + header.value.len()),
                }
            })
            .collect()
    }
}

fn fill_headers(head: &Bytes, indices: &[HeaderIndex], headers: &mut HeaderMap) -> Result<(), ParseError> {
    headers.reserve(indices.len());
    for index in indices {
        let name = HeaderName::from_bytes(&head[index.name.0..index.name.1]).map_err(ParseError::invalid_header)?;
        // SAFETY: httparse only accepts header values made of HTAB, SP, visible ASCII and obs-text,
        // which is exactly what HeaderValue allows.
        let value = unsafe { HeaderValue::from_maybe_shared_unchecked(head.slice(index.value.0..index.value.1)) };
        headers.append(name, value);
    }
    Ok(())
}

fn parse_version(version: Option<u8>) -> Result<Version, ParseError> {
    match version {
        Some(0) => Ok(Version::HTTP_10),
        Some(1) => Ok(Version::HTTP_11),
        _ => Err(ParseError::InvalidVersion(version)),
    }
}

fn version_str(version: Version) -> Result<&'static str, io::Error> {
    match version {
        Version::HTTP_10 => Ok("HTTP/1.0"),
        Version::HTTP_11 => Ok("HTTP/1.1"),
        _ => Err(io::Error::from(io::ErrorKind::Unsupported)),
    }
}

fn parse_content_length(value: &HeaderValue) -> Result<u64, ParseError> {
    let s = value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;
    s.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {s} is not u64")))
}

/// Framing of an incoming message from its `Transfer-Encoding` and `Content-Length`.
///
/// `unframed` is what a message without either header gets: requests have no
/// body then, responses run until the connection closes.
fn incoming_payload(headers: &HeaderMap, unframed: PayloadSize) -> Result<PayloadSize, ParseError> {
    let te = headers.get(http::header::TRANSFER_ENCODING);
    let cl = headers.get(http::header::CONTENT_LENGTH);

    match (te, cl) {
        (None, None) => Ok(unframed),
        (Some(te), None) => {
            if crate::negotiate::is_chunked(te) {
                Ok(PayloadSize::new_chunked())
            } else {
                Ok(unframed)
            }
        }
        (None, Some(cl)) => Ok(PayloadSize::new_length(parse_content_length(cl)?)),
        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")),
    }
}

fn write_headers(headers: &HeaderMap, dst: &mut BytesMut) {
    for (name, value) in headers {
        dst.put_slice(name.as_ref());
        dst.put_slice(b": ");
        dst.put_slice(value.as_ref());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
}

/// `io::Write` over a `BytesMut` so heads can be formatted with `write!`.
struct FastWrite<'a>(&'a mut BytesMut);

impl io::Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
