use bytes::BytesMut;
use http::{Method, Request, Uri};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use super::{HeaderIndex, HeaderLimits, fill_headers, incoming_payload, parse_version};
use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Decodes a request line and header section into a [`RequestHeader`] plus the body framing.
#[derive(Debug, Clone, Default)]
pub struct RequestHeadDecoder {
    limits: HeaderLimits,
}

impl RequestHeadDecoder {
    pub fn new(limits: HeaderLimits) -> Self {
        Self { limits }
    }
}

impl Decoder for RequestHeadDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // shortest possible request: "GET / HTTP/1.1\r\n\r\n"
        if src.len() < 14 {
            return Ok(None);
        }

        let max_header_num = self.limits.max_header_num();
        let max_header_bytes = self.limits.max_header_bytes();

        let mut headers = vec![httparse::EMPTY_HEADER; max_header_num];
        let mut req = httparse::Request::new(&mut headers);

        let status = req.parse(src).map_err(|e| match e {
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

        trace!(header_size = body_offset, "parsed request head");
        ensure!(body_offset <= max_header_bytes, ParseError::too_large_header(body_offset, max_header_bytes));

        let version = parse_version(req.version)?;
        let method = Method::from_bytes(req.method.ok_or(ParseError::InvalidMethod)?.as_bytes()).map_err(|_| ParseError::InvalidMethod)?;
        let uri = req.path.ok_or(ParseError::InvalidUri)?.parse::<Uri>().map_err(|_| ParseError::InvalidUri)?;
        let indices = HeaderIndex::record(src, req.headers);

        let head = src.split_to(body_offset).freeze();

        let mut request = Request::new(());
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = version;
        fill_headers(&head, &indices, request.headers_mut())?;

        let header = RequestHeader::from(request);
        let payload_size = if header.need_body() || has_framing(&header) {
            incoming_payload(header.headers(), PayloadSize::new_empty())?
        } else {
            PayloadSize::new_empty()
        };

        Ok(Some((header, payload_size)))
    }
}

/// A bodiless method may still announce a body; it has to be read to keep the connection in sync.
fn has_framing(header: &RequestHeader) -> bool {
    header.headers().contains_key(http::header::CONTENT_LENGTH) || header.headers().contains_key(http::header::TRANSFER_ENCODING)
}
