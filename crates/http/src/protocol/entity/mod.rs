//! The entity model: the body of a request or response.
//!
//! An [`HttpEntity`] is one of four shapes:
//!
//! - `Empty`: no body at all
//! - `Buffered`: the whole body already sits in memory
//! - `Streaming`: a lazily produced sequence of chunks, with or without a declared length
//! - `Composed`: an ordered set of named parts framed by a [`PartEncoder`]
//!
//! Every shape implements [`http_body::Body`], so the codec layer treats them
//! uniformly and the negotiator reads the length through [`Body::size_hint`].
//!
//! A streaming entity is read at most once unless its reader exposes the
//! [`Resettable`] capability; [`HttpEntity::reset`] is what the redirect path
//! uses to replay a request body.

mod composed;
mod reader;

pub use composed::{ComposedEntity, FormDataEncoder, Part, PartData, PartEncoder};
pub use reader::{BytesReader, EntityReader, Resettable, StreamReader, StreamingEntity, async_read_reader};
pub(crate) use reader::DEFAULT_CHUNK_SIZE;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;

#[derive(Debug, Default)]
pub enum HttpEntity {
    #[default]
    Empty,
    Buffered(BufferedEntity),
    Streaming(StreamingEntity),
    Composed(ComposedEntity),
}

/// Bytes that are sent as one frame and can be sent again after a reset.
#[derive(Debug, Clone)]
pub struct BufferedEntity {
    bytes: Bytes,
    sent: bool,
}

impl BufferedEntity {
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

impl HttpEntity {
    pub fn empty() -> Self {
        HttpEntity::Empty
    }

    pub fn buffered(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() { HttpEntity::Empty } else { HttpEntity::Buffered(BufferedEntity { bytes, sent: false }) }
    }

    pub fn streaming<R: EntityReader + 'static>(reader: R, length: Option<u64>) -> Self {
        HttpEntity::Streaming(StreamingEntity::new(reader, length))
    }

    pub fn from_stream<S>(stream: S, length: Option<u64>) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::streaming(StreamReader::new(stream), length)
    }

    pub fn composed(parts: Vec<Part>) -> Self {
        HttpEntity::Composed(ComposedEntity::new(parts))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, HttpEntity::Empty)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, HttpEntity::Streaming(_))
    }

    pub fn is_composed(&self) -> bool {
        matches!(self, HttpEntity::Composed(_))
    }

    /// The body length when it is known without reading the body.
    pub fn length(&self) -> Option<u64> {
        match self {
            HttpEntity::Empty => Some(0),
            HttpEntity::Buffered(buffered) => Some(buffered.bytes.len() as u64),
            HttpEntity::Streaming(streaming) => streaming.length(),
            HttpEntity::Composed(composed) => composed.length(),
        }
    }

    /// The `Content-Type` implied by the entity itself (composed entities carry a boundary).
    pub fn content_type(&self) -> Option<String> {
        match self {
            HttpEntity::Composed(composed) => Some(composed.content_type()),
            _ => None,
        }
    }

    /// Whether the entity can be sent again from its first byte.
    pub fn is_replayable(&mut self) -> bool {
        match self {
            HttpEntity::Empty | HttpEntity::Buffered(_) => true,
            HttpEntity::Streaming(streaming) => streaming.is_replayable(),
            HttpEntity::Composed(composed) => composed.is_replayable(),
        }
    }

    /// Rewinds the entity for another send.
    pub fn reset(&mut self) -> io::Result<()> {
        match self {
            HttpEntity::Empty => Ok(()),
            HttpEntity::Buffered(buffered) => {
                buffered.sent = false;
                Ok(())
            }
            HttpEntity::Streaming(streaming) => streaming.reset(),
            HttpEntity::Composed(composed) => composed.reset(),
        }
    }

    /// Reads the remaining body into memory.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            HttpEntity::Empty => Ok(Bytes::new()),
            HttpEntity::Buffered(buffered) if !buffered.sent => Ok(buffered.bytes),
            other => Ok(other.collect().await?.to_bytes()),
        }
    }

    /// Encodes the entity fully and returns it as a buffered entity.
    ///
    /// Used when a length is required but can only be learned by encoding.
    pub async fn materialize(self) -> io::Result<HttpEntity> {
        match self {
            entity @ (HttpEntity::Empty | HttpEntity::Buffered(_)) => Ok(entity),
            other => Ok(HttpEntity::buffered(other.into_bytes().await?)),
        }
    }
}

impl Body for HttpEntity {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = match this {
            HttpEntity::Empty => return Poll::Ready(None),
            HttpEntity::Buffered(buffered) => {
                if buffered.sent {
                    return Poll::Ready(None);
                }
                buffered.sent = true;
                return Poll::Ready(Some(Ok(Frame::data(buffered.bytes.clone()))));
            }
            HttpEntity::Streaming(streaming) => streaming.poll_chunk(cx),
            HttpEntity::Composed(composed) => composed.poll_chunk(cx),
        };

        polled.map(|option| option.map(|result| result.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        match self {
            HttpEntity::Empty => true,
            HttpEntity::Buffered(buffered) => buffered.sent,
            _ => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self.length() {
            Some(length) => SizeHint::with_exact(length),
            None => SizeHint::new(),
        }
    }
}

impl From<Bytes> for HttpEntity {
    fn from(bytes: Bytes) -> Self {
        HttpEntity::buffered(bytes)
    }
}

impl From<Vec<u8>> for HttpEntity {
    fn from(bytes: Vec<u8>) -> Self {
        HttpEntity::buffered(bytes)
    }
}

impl From<String> for HttpEntity {
    fn from(value: String) -> Self {
        HttpEntity::buffered(value)
    }
}

impl From<&'static str> for HttpEntity {
    fn from(value: &'static str) -> Self {
        HttpEntity::buffered(Bytes::from_static(value.as_bytes()))
    }
}

impl From<()> for HttpEntity {
    fn from(_: ()) -> Self {
        HttpEntity::Empty
    }
}
