use std::io;
use std::io::ErrorKind;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::body::PayloadEncoder;
use crate::codec::header::ResponseHeadEncoder;
use crate::protocol::{Message, PayloadItem, PayloadSize, ResponseHead, SendError};

/// Server side encoder: a response head followed by its body items, ending with `Eof`.
#[derive(Debug, Default)]
pub struct ResponseEncoder {
    header_encoder: ResponseHeadEncoder,
    payload_encoder: Option<PayloadEncoder>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl<D: Buf> Encoder<Message<(ResponseHead, PayloadSize), D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(ResponseHead, PayloadSize), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                if self.payload_encoder.is_some() {
                    error!("expect payload item but receive response head");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                }
                self.header_encoder.encode(&head, dst)?;
                self.payload_encoder = Some(payload_size.into());
                Ok(())
            }
            Message::Payload(payload_item) => {
                let Some(payload_encoder) = &mut self.payload_encoder else {
                    error!("expect response header but receive payload item");
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
