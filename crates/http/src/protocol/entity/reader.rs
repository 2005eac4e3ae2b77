use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Default chunk size used when slicing in-memory data into a stream.
pub(crate) const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// A lazily produced sequence of body chunks.
///
/// `poll_chunk` returns `Ready(None)` once the source is exhausted.
pub trait EntityReader: Send {
    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>>;

    /// Returns the restart capability when the reader supports it.
    fn as_resettable(&mut self) -> Option<&mut dyn Resettable> {
        None
    }
}

/// Capability of a reader that can be rewound to its first byte.
///
/// Used to replay request bodies on redirect. Readers without it can only be
/// consumed once.
pub trait Resettable {
    fn reset(&mut self) -> io::Result<()>;
}

/// In-memory reader that yields its data in fixed-size slices.
#[derive(Debug, Clone)]
pub struct BytesReader {
    data: Bytes,
    position: usize,
    chunk_size: usize,
}

impl BytesReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_chunk_size(data, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(data: impl Into<Bytes>, chunk_size: usize) -> Self {
        Self { data: data.into(), position: 0, chunk_size: chunk_size.max(1) }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl EntityReader for BytesReader {
    fn poll_chunk(&mut self, _cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        if self.position >= self.data.len() {
            return Poll::Ready(None);
        }
        let end = (self.position + self.chunk_size).min(self.data.len());
        let chunk = self.data.slice(self.position..end);
        self.position = end;
        Poll::Ready(Some(Ok(chunk)))
    }

    fn as_resettable(&mut self) -> Option<&mut dyn Resettable> {
        Some(self)
    }
}

impl Resettable for BytesReader {
    fn reset(&mut self) -> io::Result<()> {
        self.position = 0;
        Ok(())
    }
}

/// Adapts any fallible byte stream. Not resettable.
pub struct StreamReader<S> {
    stream: Pin<Box<S>>,
}

impl<S> StreamReader<S>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream: Box::pin(stream) }
    }
}

impl<S> fmt::Debug for StreamReader<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader").finish_non_exhaustive()
    }
}

impl<S> EntityReader for StreamReader<S>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        self.stream.poll_next_unpin(cx)
    }
}

/// Builds a reader over an [`AsyncRead`] source, reading `chunk_size` bytes at a time.
pub fn async_read_reader<R>(reader: R, chunk_size: usize) -> StreamReader<ReaderStream<R>>
where
    R: AsyncRead + Send,
{
    StreamReader::new(ReaderStream::with_capacity(reader, chunk_size.max(1)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Fresh,
    Reading,
    Exhausted,
}

/// A body produced lazily by an [`EntityReader`], optionally with a declared length.
pub struct StreamingEntity {
    reader: Box<dyn EntityReader>,
    length: Option<u64>,
    state: ReadState,
}

impl fmt::Debug for StreamingEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingEntity").field("length", &self.length).field("state", &self.state).finish_non_exhaustive()
    }
}

impl StreamingEntity {
    pub fn new<R: EntityReader + 'static>(reader: R, length: Option<u64>) -> Self {
        Self { reader: Box::new(reader), length, state: ReadState::Fresh }
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Whether bytes have already been pulled out of the reader.
    pub fn is_consumed(&self) -> bool {
        self.state != ReadState::Fresh
    }

    /// Whether the entity can be sent (again) from its first byte.
    pub fn is_replayable(&mut self) -> bool {
        self.state == ReadState::Fresh || self.reader.as_resettable().is_some()
    }

    /// Rewinds the reader so the entity can be sent again.
    ///
    /// A fresh entity needs no rewind. A consumed entity without the
    /// [`Resettable`] capability fails instead of replaying zero bytes.
    pub fn reset(&mut self) -> io::Result<()> {
        if self.state == ReadState::Fresh {
            return Ok(());
        }
        match self.reader.as_resettable() {
            Some(resettable) => {
                resettable.reset()?;
                self.state = ReadState::Fresh;
                Ok(())
            }
            None => Err(io::Error::new(io::ErrorKind::Unsupported, "streaming entity was consumed and can't be reset")),
        }
    }

    pub fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        if self.state == ReadState::Exhausted {
            return Poll::Ready(None);
        }
        self.state = ReadState::Reading;
        match self.reader.poll_chunk(cx) {
            Poll::Ready(None) => {
                self.state = ReadState::Exhausted;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                self.state = ReadState::Exhausted;
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::poll_fn;

    async fn drain(entity: &mut StreamingEntity) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = poll_fn(|cx| entity.poll_chunk(cx)).await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn bytes_reader_replays_after_reset() {
        let mut entity = StreamingEntity::new(BytesReader::with_chunk_size("hello world", 4), Some(11));
        assert_eq!(drain(&mut entity).await, b"hello world");
        assert!(entity.is_replayable());
        entity.reset().unwrap();
        assert_eq!(drain(&mut entity).await, b"hello world");
    }

    #[tokio::test]
    async fn stream_reader_refuses_second_read() {
        let stream = futures::stream::iter(vec![Ok(Bytes::from_static(b"once"))]);
        let mut entity = StreamingEntity::new(StreamReader::new(stream), None);
        assert!(entity.is_replayable());
        assert_eq!(drain(&mut entity).await, b"once");
        assert!(!entity.is_replayable());
        assert_eq!(entity.reset().unwrap_err().kind(), io::ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn async_read_is_chunked() {
        let reader = async_read_reader(std::io::Cursor::new(vec![7u8; 100]), 32);
        let mut entity = StreamingEntity::new(reader, Some(100));
        let mut sizes = Vec::new();
        while let Some(chunk) = poll_fn(|cx| entity.poll_chunk(cx)).await {
            sizes.push(chunk.unwrap().len());
        }
        assert_eq!(sizes.iter().sum::<usize>(), 100);
        assert!(sizes.iter().all(|size| *size <= 32));
    }
}
