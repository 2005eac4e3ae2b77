use std::io;
use std::io::ErrorKind;

use bytes::{Buf, BytesMut};
use http::Request;
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::body::PayloadEncoder;
use crate::codec::header::RequestHeadEncoder;
use crate::protocol::{Message, PayloadItem, PayloadSize, SendError};

/// Client side encoder: a request head followed by its body items, ending with `Eof`.
#[derive(Debug, Default)]
pub struct RequestEncoder {
    header_encoder: RequestHeadEncoder,
    payload_encoder: Option<PayloadEncoder>,
}

impl RequestEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl<D: Buf> Encoder<Message<(Request<()>, PayloadSize), D>> for RequestEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(Request<()>, PayloadSize), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                if self.payload_encoder.is_some() {
                    error!("expect payload item but receive request head");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                }
                self.header_encoder.encode(&head, dst)?;
                self.payload_encoder = Some(payload_size.into());
                Ok(())
            }
            Message::Payload(payload_item) => {
                let Some(payload_encoder) = &mut self.payload_encoder else {
                    error!("expect request head but receive payload item");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                };
                let is_eof = matches!(payload_item, PayloadItem::Eof);
                let result = payload_encoder.encode(payload_item, dst);
                if is_eof || result.is_err() {
                    self.payload_encoder.take();
                }
                result
            }
        }
    }
}
