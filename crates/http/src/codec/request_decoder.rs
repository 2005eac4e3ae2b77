use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::{HeaderLimits, RequestHeadDecoder};
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

/// Server side decoder: a request head followed by its body items.
///
/// While `payload_decoder` is `None` the decoder is waiting for the next head.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    header_decoder: RequestHeadDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_limits(limits: HeaderLimits) -> Self {
        Self { header_decoder: RequestHeadDecoder::new(limits), payload_decoder: None }
    }

    fn on_payload(&mut self, item: Option<PayloadItem>) -> Option<Message<(RequestHeader, PayloadSize)>> {
        let item = item?;
        if item.is_eof() {
            self.payload_decoder.take();
        }
        Some(Message::Payload(item))
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let item = payload_decoder.decode(src)?;
            return Ok(self.on_payload(item));
        }

        let message = self.header_decoder.decode(src)?.map(|(header, payload_size)| {
            self.payload_decoder = Some(payload_size.into());
            Message::Header((header, payload_size))
        });
        Ok(message)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let item = payload_decoder.decode_eof(src)?;
            return Ok(self.on_payload(item));
        }

        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(ParseError::invalid_header("connection closed in the middle of a request head")),
        }
    }
}
