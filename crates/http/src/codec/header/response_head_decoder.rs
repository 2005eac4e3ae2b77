use bytes::BytesMut;
use http::{Method, Response, StatusCode};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use super::{HeaderIndex, HeaderLimits, fill_headers, incoming_payload, parse_version};
use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, ResponseHead, is_body_forbidden};

/// Decodes a status line and header section into a [`ResponseHead`] plus the body framing.
///
/// The framing of a response depends on the request it answers, so the
/// decoder has to be told the request method before each response.
#[derive(Debug, Clone)]
pub struct ResponseHeadDecoder {
    limits: HeaderLimits,
    request_method: Method,
}

impl Default for ResponseHeadDecoder {
    fn default() -> Self {
        Self::new(HeaderLimits::default())
    }
}

impl ResponseHeadDecoder {
    pub fn new(limits: HeaderLimits) -> Self {
        Self { limits, request_method: Method::GET }
    }

    pub fn set_request_method(&mut self, method: Method) {
        self.request_method = method;
    }
}

impl Decoder for ResponseHeadDecoder {
    type Item = (ResponseHead, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // shortest possible response: "HTTP/1.1 200 \r\n\r\n"
        if src.len() < 16 {
            return Ok(None);
        }

        let max_header_num = self.limits.max_header_num();
        let max_header_bytes = self.limits.max_header_bytes();

        let mut headers = vec![httparse::EMPTY_HEADER; max_header_num];
        let mut resp = httparse::Response::new(&mut headers);

        let status = resp.parse(src).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(max_header_num),
            e => ParseError::invalid_header(e.to_string()),
        })?;

        let body_offset = match status {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(src.len() <= max_header_bytes, ParseError::too_large_header(src.len(), max_header_bytes));
                return Ok(None);
            }
        };

        trace!(header_size = body_offset, "parsed response head");
        ensure!(body_offset <= max_header_bytes, ParseError::too_large_header(body_offset, max_header_bytes));

        let version = parse_version(resp.version)?;
        let status = StatusCode::from_u16(resp.code.ok_or(ParseError::InvalidStatus)?).map_err(|_| ParseError::InvalidStatus)?;
        let indices = HeaderIndex::record(src, resp.headers);

        let head = src.split_to(body_offset).freeze();

        let mut response = Response::new(());
        *response.status_mut() = status;
        *response.version_mut() = version;
        fill_headers(&head, &indices, response.headers_mut())?;

        let payload_size = if is_body_forbidden(&self.request_method, status) {
            PayloadSize::new_empty()
        } else {
            incoming_payload(response.headers(), PayloadSize::new_until_close())?
        };

        Ok(Some((response, payload_size)))
    }
}
