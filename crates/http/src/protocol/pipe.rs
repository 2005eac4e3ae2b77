//! Bounded producer/consumer pipe for body bytes.
//!
//! The pipe holds at most `capacity` bytes. The producer side either awaits
//! free space ([`PipeWriter::write_all`]) or checks it without blocking
//! ([`PipeWriter::available_space`] + [`PipeWriter::try_write`]); the consumer
//! side is an [`EntityReader`] so it can back a streaming entity directly.
//!
//! Closing rules:
//! - dropping or closing the writer ends the body after the queued chunks are read
//! - [`PipeWriter::fail`] ends the body with an error
//! - dropping the reader discards queued chunks and makes further writes fail with `BrokenPipe`

use std::collections::VecDeque;
use std::fmt;
use std::future::poll_fn;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::task::AtomicWaker;

use crate::protocol::entity::EntityReader;

/// Default bound used for deferred client bodies.
pub const DEFAULT_PIPE_CAPACITY: usize = 10 * 1024;

pub fn body_pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(PipeState {
            chunks: VecDeque::new(),
            buffered: 0,
            capacity: capacity.max(1),
            writer_closed: false,
            reader_closed: false,
            error: None,
        }),
        reader_waker: AtomicWaker::new(),
        writer_waker: AtomicWaker::new(),
    });
    (PipeWriter { shared: Arc::clone(&shared) }, PipeReader { shared })
}

struct Shared {
    state: Mutex<PipeState>,
    reader_waker: AtomicWaker,
    writer_waker: AtomicWaker,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct PipeState {
    chunks: VecDeque<Bytes>,
    buffered: usize,
    capacity: usize,
    writer_closed: bool,
    reader_closed: bool,
    error: Option<(io::ErrorKind, String)>,
}

impl PipeState {
    fn available(&self) -> usize {
        if self.reader_closed || self.writer_closed { 0 } else { self.capacity.saturating_sub(self.buffered) }
    }
}

/// Producer end of a [`body_pipe`].
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("PipeWriter").field("buffered", &state.buffered).field("capacity", &state.capacity).finish()
    }
}

impl PipeWriter {
    /// Bytes that can be written right now without exceeding the bound.
    pub fn available_space(&self) -> usize {
        self.shared.lock().available()
    }

    /// Whether the consumer is gone.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().reader_closed
    }

    /// Writes as much of `data` as currently fits and returns the written count.
    pub fn try_write(&self, data: &Bytes) -> io::Result<usize> {
        let n = Self::write_locked(&mut self.shared.lock(), data)?;
        if n > 0 {
            self.shared.reader_waker.wake();
        }
        Ok(n)
    }

    fn write_locked(state: &mut PipeState, data: &Bytes) -> io::Result<usize> {
        if state.reader_closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "body pipe reader closed"));
        }
        if state.writer_closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "body pipe writer already closed"));
        }
        let n = state.available().min(data.len());
        if n > 0 {
            state.chunks.push_back(data.slice(..n));
            state.buffered += n;
        }
        Ok(n)
    }

    pub fn poll_write(&self, cx: &mut Context<'_>, data: &Bytes) -> Poll<io::Result<usize>> {
        // registered first so a read racing this check still wakes us
        self.shared.writer_waker.register(cx.waker());
        match self.try_write(data) {
            Ok(0) if !data.is_empty() => Poll::Pending,
            result => Poll::Ready(result),
        }
    }

    /// Writes all of `data`, waiting for the consumer to free space as needed.
    pub async fn write_all(&self, mut data: Bytes) -> io::Result<()> {
        while !data.is_empty() {
            let n = poll_fn(|cx| self.poll_write(cx, &data)).await?;
            let _ = data.split_to(n);
        }
        Ok(())
    }

    /// Ends the body normally once queued chunks are consumed.
    pub fn close(&self) {
        self.shared.lock().writer_closed = true;
        self.shared.reader_waker.wake();
    }

    /// Ends the body with an error surfaced to the consumer.
    pub fn fail(&self, e: &io::Error) {
        {
            let mut state = self.shared.lock();
            if !state.writer_closed {
                state.error = Some((e.kind(), e.to_string()));
                state.writer_closed = true;
            }
        }
        self.shared.reader_waker.wake();
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer end of a [`body_pipe`].
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("PipeReader").field("buffered", &state.buffered).field("finished", &state.writer_closed).finish()
    }
}

impl EntityReader for PipeReader {
    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        self.shared.reader_waker.register(cx.waker());
        let mut state = self.shared.lock();
        if let Some(chunk) = state.chunks.pop_front() {
            state.buffered -= chunk.len();
            drop(state);
            self.shared.writer_waker.wake();
            return Poll::Ready(Some(Ok(chunk)));
        }
        if let Some((kind, message)) = state.error.take() {
            return Poll::Ready(Some(Err(io::Error::new(kind, message))));
        }
        if state.writer_closed {
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.reader_closed = true;
            state.chunks.clear();
            state.buffered = 0;
        }
        self.shared.writer_waker.wake();
    }
}
