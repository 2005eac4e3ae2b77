use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;

use super::chunked_encoder::ChunkedEncoder;
use super::length_encoder::LengthEncoder;
use crate::protocol::{PayloadItem, PayloadSize, SendError};

/// Encodes a message body with the framing chosen during negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEncoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Length(LengthEncoder),
    Chunked(ChunkedEncoder),
    /// raw bytes, the connection close ends the body
    UntilClose { eof: bool },
    NoBody,
}

impl PayloadEncoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedEncoder::new()) }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthEncoder::new(size)) }
    }

    pub fn until_close() -> Self {
        Self { kind: Kind::UntilClose { eof: false } }
    }

    pub fn is_finish(&self) -> bool {
        match &self.kind {
            Kind::Length(encoder) => encoder.is_finish(),
            Kind::Chunked(encoder) => encoder.is_finish(),
            Kind::UntilClose { eof } => *eof,
            Kind::NoBody => true,
        }
    }
}

impl From<PayloadSize> for PayloadEncoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(n) => PayloadEncoder::fix_length(n),
            PayloadSize::Chunked => PayloadEncoder::chunked(),
            PayloadSize::UntilClose => PayloadEncoder::until_close(),
            PayloadSize::Empty => PayloadEncoder::empty(),
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match &mut self.kind {
            Kind::Length(encoder) => encoder.encode(item, dst),
            Kind::Chunked(encoder) => encoder.encode(item, dst),
            Kind::UntilClose { eof } => {
                match item {
                    PayloadItem::Chunk(mut bytes) => {
                        while bytes.has_remaining() {
                            let chunk = bytes.chunk();
                            let n = chunk.len();
                            dst.extend_from_slice(chunk);
                            bytes.advance(n);
                        }
                    }
                    PayloadItem::Eof => *eof = true,
                }
                Ok(())
            }
            Kind::NoBody => match item {
                PayloadItem::Chunk(bytes) if bytes.has_remaining() => {
                    Err(SendError::invalid_body("body given for a message that can't carry one"))
                }
                _ => Ok(()),
            },
        }
    }
}
