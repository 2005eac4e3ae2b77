use std::io::Write;

use bytes::BytesMut;
use tokio_util::codec::Encoder;
use tracing::error;

use super::{FastWrite, version_str, write_headers};
use crate::protocol::{ResponseHead, SendError};

const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Writes the status line and header section of a response.
///
/// Framing headers are written exactly as they are; the caller has already
/// negotiated them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseHeadEncoder;

impl Encoder<&ResponseHead> for ResponseHeadEncoder {
    type Error = SendError;

    fn encode(&mut self, head: &ResponseHead, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let version = version_str(head.version()).inspect_err(|_| error!(http_version = ?head.version(), "unsupported http version"))?;

        dst.reserve(INIT_HEADER_SIZE);
        let status = head.status();
        write!(FastWrite(dst), "{} {} {}\r\n", version, status.as_str(), status.canonical_reason().unwrap_or(""))?;
        write_headers(head.headers(), dst);
        Ok(())
    }
}
