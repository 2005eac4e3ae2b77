//! Transparent decoding of compressed response bodies.

use std::io;
use std::io::Write;

use bytes::{BufMut, Bytes, BytesMut};
use flate2::write::{GzDecoder, ZlibDecoder};
use http::HeaderMap;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use tracing::trace;
use zstd::stream::write::Decoder as ZstdDecoder;

use crate::client::ClientError;

pub(crate) const ACCEPT_ENCODING_VALUE: &str = "gzip, deflate, br, zstd";

const BROTLI_BUFFER_SIZE: usize = 32 * 1024;

/// `io::Write` sink the decoders write into; drained after every write.
#[derive(Debug, Default)]
pub(crate) struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) enum Decompressor {
    Gzip(Box<GzDecoder<Writer>>),
    Deflate(Box<ZlibDecoder<Writer>>),
    Zstd(ZstdDecoder<'static, Writer>),
    Br(Box<brotli::DecompressorWriter<Writer>>),
}

impl std::fmt::Debug for Decompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Decompressor").field(&self.name()).finish()
    }
}

impl Decompressor {
    /// Picks a decoder for the response `Content-Encoding` and strips the headers that no longer hold.
    ///
    /// Returns `None` for identity or unknown codings, leaving the headers untouched.
    pub(crate) fn from_headers(headers: &mut HeaderMap) -> Result<Option<Self>, ClientError> {
        let Some(encoding) = headers.get(CONTENT_ENCODING).and_then(|value| value.to_str().ok()) else {
            return Ok(None);
        };

        let decompressor = match encoding.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Self::Gzip(Box::new(GzDecoder::new(Writer::default()))),
            "deflate" => Self::Deflate(Box::new(ZlibDecoder::new(Writer::default()))),
            "zstd" => Self::Zstd(ZstdDecoder::new(Writer::default()).map_err(|e| ClientError::Decoding { encoding: "zstd", source: e })?),
            "br" => Self::Br(Box::new(brotli::DecompressorWriter::new(Writer::default(), BROTLI_BUFFER_SIZE))),
            other => {
                trace!(encoding = other, "unsupported content-encoding, body left as is");
                return Ok(None);
            }
        };

        headers.remove(CONTENT_ENCODING);
        headers.remove(CONTENT_LENGTH);
        Ok(Some(decompressor))
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Gzip(_) => "gzip",
            Self::Deflate(_) => "deflate",
            Self::Zstd(_) => "zstd",
            Self::Br(_) => "br",
        }
    }

    /// Decodes one chunk and returns whatever output it produced.
    pub(crate) fn decode(&mut self, data: &[u8]) -> Result<Bytes, ClientError> {
        let encoding = self.name();
        let result = match self {
            Self::Gzip(decoder) => decoder.write_all(data).and_then(|()| decoder.flush()).map(|()| decoder.get_mut().take()),
            Self::Deflate(decoder) => decoder.write_all(data).and_then(|()| decoder.flush()).map(|()| decoder.get_mut().take()),
            Self::Zstd(decoder) => decoder.write_all(data).and_then(|()| decoder.flush()).map(|()| decoder.get_mut().take()),
            Self::Br(decoder) => decoder.write_all(data).and_then(|()| decoder.flush()).map(|()| decoder.get_mut().take()),
        };
        result.map_err(|source| ClientError::Decoding { encoding, source })
    }

    /// Ends the stream and returns the remaining output.
    pub(crate) fn finish(self) -> Result<Bytes, ClientError> {
        let encoding = self.name();
        let result = match self {
            Self::Gzip(decoder) => decoder.finish().map(|mut writer| writer.take()),
            Self::Deflate(decoder) => decoder.finish().map(|mut writer| writer.take()),
            Self::Zstd(mut decoder) => decoder.flush().map(|()| decoder.into_inner().take()),
            Self::Br(decoder) => decoder.into_inner().map(|mut writer| writer.take()).map_err(|_unfinished| io::Error::new(io::ErrorKind::UnexpectedEof, "truncated brotli stream")),
        };
        result.map_err(|source| ClientError::Decoding { encoding, source })
    }
}
