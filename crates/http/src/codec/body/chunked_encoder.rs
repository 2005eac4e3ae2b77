use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;

use crate::protocol::{PayloadItem, SendError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkedEncoder {
    eof: bool,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self { eof: false }
    }

    pub fn is_finish(&self) -> bool {
        self.eof
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for ChunkedEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Ok(());
        }

        match item {
            // an empty chunk would read as the last one
            PayloadItem::Chunk(bytes) if !bytes.has_remaining() => Ok(()),
            PayloadItem::Chunk(mut bytes) => {
                let len = bytes.remaining();
                dst.reserve(len + 12);
                write!(dst.writer(), "{len:X}\r\n")?;
                while bytes.has_remaining() {
                    let chunk = bytes.chunk();
                    let n = chunk.len();
                    dst.extend_from_slice(chunk);
                    bytes.advance(n);
                }
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
            PayloadItem::Eof => {
                self.eof = true;
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn frames_chunks() {
        let mut encoder = ChunkedEncoder::new();
        let mut buf = BytesMut::new();
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"hello, world!!!!")), &mut buf).unwrap();
        encoder.encode(PayloadItem::Chunk(Bytes::new()), &mut buf).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut buf).unwrap();
        assert!(encoder.is_finish());
        assert_eq!(&buf[..], b"10\r\nhello, world!!!!\r\n0\r\n\r\n");
    }
}
