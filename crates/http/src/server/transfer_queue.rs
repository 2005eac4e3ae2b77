//! Non-blocking transfer of bytes into destinations with limited capacity.
//!
//! A single background task owns every pending transfer. On each pass it
//! writes as much of every transfer as its destination currently accepts and
//! requeues the rest. When a whole pass makes no progress the task backs off
//! for [`IDLE_BACKOFF`], waking early if a new transfer arrives.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, Bytes};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::protocol::pipe::PipeWriter;

const IDLE_BACKOFF: Duration = Duration::from_millis(2);

/// Something bytes can be pushed into without blocking.
pub trait TransferDestination: Send + Sync {
    /// Bytes the destination accepts right now.
    fn available_space(&self) -> usize;

    /// Writes a prefix of `data` and returns its length.
    fn write(&self, data: &Bytes) -> io::Result<usize>;

    fn is_closed(&self) -> bool;
}

impl TransferDestination for PipeWriter {
    fn available_space(&self) -> usize {
        PipeWriter::available_space(self)
    }

    fn write(&self, data: &Bytes) -> io::Result<usize> {
        self.try_write(data)
    }

    fn is_closed(&self) -> bool {
        PipeWriter::is_closed(self)
    }
}

/// Handle to the transfer loop; clones share the same loop.
///
/// The loop task is spawned on the first [`enqueue`](Self::enqueue) and ends
/// once every handle is dropped and the pending transfers are settled.
#[derive(Clone, Default)]
pub struct TransferQueue {
    sender: Arc<OnceLock<mpsc::UnboundedSender<Transfer>>>,
}

impl fmt::Debug for TransferQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferQueue").field("running", &self.sender.get().is_some()).finish()
    }
}

impl TransferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `data` for `destination`; the returned future resolves once every byte is written.
    pub fn enqueue(&self, destination: Arc<dyn TransferDestination>, data: Bytes) -> TransferFuture {
        let (done, receiver) = oneshot::channel();
        let sender = self.sender.get_or_init(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            tokio::spawn(transfer_loop(receiver));
            sender
        });

        if let Err(mpsc::error::SendError(transfer)) = sender.send(Transfer { destination, data, done }) {
            let _ = transfer.done.send(Err(io::Error::new(io::ErrorKind::BrokenPipe, "transfer queue stopped")));
        }
        TransferFuture { receiver }
    }
}

/// Resolves when a queued transfer completes or fails.
#[derive(Debug)]
pub struct TransferFuture {
    receiver: oneshot::Receiver<io::Result<()>>,
}

impl Future for TransferFuture {
    type Output = io::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::BrokenPipe, "transfer queue stopped"))))
    }
}

struct Transfer {
    destination: Arc<dyn TransferDestination>,
    data: Bytes,
    done: oneshot::Sender<io::Result<()>>,
}

enum Step {
    Progress,
    Stalled,
    Finished(io::Result<()>),
}

impl Transfer {
    fn step(&mut self) -> Step {
        if self.data.is_empty() {
            return Step::Finished(Ok(()));
        }
        if self.destination.is_closed() {
            return Step::Finished(Err(io::Error::new(io::ErrorKind::BrokenPipe, "transfer destination closed")));
        }

        let n = self.destination.available_space().min(self.data.len());
        if n == 0 {
            return Step::Stalled;
        }

        match self.destination.write(&self.data.slice(..n)) {
            Ok(0) => Step::Stalled,
            Ok(written) => {
                self.data.advance(written);
                if self.data.is_empty() { Step::Finished(Ok(())) } else { Step::Progress }
            }
            Err(e) => Step::Finished(Err(e)),
        }
    }
}

async fn transfer_loop(mut receiver: mpsc::UnboundedReceiver<Transfer>) {
    let mut pending = VecDeque::new();
    let mut open = true;

    loop {
        if pending.is_empty() {
            if !open {
                break;
            }
            match receiver.recv().await {
                Some(transfer) => pending.push_back(transfer),
                None => break,
            }
        }
        while let Ok(transfer) = receiver.try_recv() {
            pending.push_back(transfer);
        }

        let mut progressed = false;
        for _ in 0..pending.len() {
            let Some(mut transfer) = pending.pop_front() else { break };
            if transfer.done.is_closed() {
                trace!("transfer abandoned by its caller");
                progressed = true;
                continue;
            }
            match transfer.step() {
                Step::Progress => {
                    progressed = true;
                    pending.push_back(transfer);
                }
                Step::Stalled => pending.push_back(transfer),
                Step::Finished(result) => {
                    progressed = true;
                    let _ = transfer.done.send(result);
                }
            }
        }

        if progressed || pending.is_empty() {
            continue;
        }

        if open {
            tokio::select! {
                () = tokio::time::sleep(IDLE_BACKOFF) => {}
                transfer = receiver.recv() => match transfer {
                    Some(transfer) => pending.push_back(transfer),
                    None => open = false,
                },
            }
        } else {
            tokio::time::sleep(IDLE_BACKOFF).await;
        }
    }

    debug!("transfer queue stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::entity::EntityReader;
    use crate::protocol::pipe::body_pipe;
    use std::future::poll_fn;

    #[tokio::test]
    async fn drains_into_a_small_pipe() {
        let queue = TransferQueue::new();
        let (writer, mut reader) = body_pipe(4);
        let writer: Arc<dyn TransferDestination> = Arc::new(writer);

        let data = Bytes::from_static(b"a fairly long payload for a tiny pipe");
        let transfer = queue.enqueue(Arc::clone(&writer), data.clone());

        let reading = tokio::spawn(async move {
            let mut received = Vec::new();
            while received.len() < 37 {
                let chunk = poll_fn(|cx| reader.poll_chunk(cx)).await.unwrap().unwrap();
                received.extend_from_slice(&chunk);
            }
            received
        });

        transfer.await.unwrap();
        assert_eq!(reading.await.unwrap(), data.to_vec());
    }

    #[tokio::test]
    async fn fails_when_destination_closes() {
        let queue = TransferQueue::new();
        let (writer, reader) = body_pipe(2);
        let transfer = queue.enqueue(Arc::new(writer), Bytes::from_static(b"more than two bytes"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(reader);
        let e = transfer.await.unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);
    }
}
