use bytes::BytesMut;
use http::Method;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::{HeaderLimits, ResponseHeadDecoder};
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, ResponseHead};

/// Client side decoder: a response head followed by its body items.
///
/// Call [`set_request_method`](Self::set_request_method) before every
/// response; a `HEAD` response never has a body whatever its headers say.
#[derive(Debug, Default)]
pub struct ResponseDecoder {
    header_decoder: ResponseHeadDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_limits(limits: HeaderLimits) -> Self {
        Self { header_decoder: ResponseHeadDecoder::new(limits), payload_decoder: None }
    }

    pub fn set_request_method(&mut self, method: Method) {
        self.header_decoder.set_request_method(method);
    }

    fn on_payload(&mut self, item: Option<PayloadItem>) -> Option<Message<(ResponseHead, PayloadSize)>> {
        let item = item?;
        if item.is_eof() {
            self.payload_decoder.take();
        }
        Some(Message::Payload(item))
    }
}

impl Decoder for ResponseDecoder {
    type Item = Message<(ResponseHead, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let item = payload_decoder.decode(src)?;
            return Ok(self.on_payload(item));
        }

        let message = self.header_decoder.decode(src)?.map(|(head, payload_size)| {
            self.payload_decoder = Some(payload_size.into());
            Message::Header((head, payload_size))
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
            None => Err(ParseError::invalid_header("connection closed in the middle of a response head")),
        }
    }
}
