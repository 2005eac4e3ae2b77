use std::io::Write;

use bytes::BytesMut;
use http::Request;
use tokio_util::codec::Encoder;

use super::{FastWrite, version_str, write_headers};
use crate::protocol::SendError;

const INIT_HEADER_SIZE: usize = 1024;

/// Writes the request line and header section of a request.
///
/// The request target is the URI as given: origin form (`/path?query`) for a
/// direct connection, absolute form when talking to a proxy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestHeadEncoder;

impl Encoder<&Request<()>> for RequestHeadEncoder {
    type Error = SendError;

    fn encode(&mut self, head: &Request<()>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let version = version_str(head.version())?;
        let uri = head.uri();
        let target = if uri.scheme().is_some() {
            uri.to_string()
        } else {
            uri.path_and_query().map(|pq| pq.as_str()).filter(|s| !s.is_empty()).unwrap_or("/").to_string()
        };

        dst.reserve(INIT_HEADER_SIZE);
        write!(FastWrite(dst), "{} {} {}\r\n", head.method(), target, version)?;
        write_headers(head.headers(), dst);
        Ok(())
    }
}
