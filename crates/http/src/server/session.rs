//! The per-response write session.
//!
//! A handler receives one [`ResponseSession`] per request and initiates the
//! response exactly once, either whole with [`ResponseSession::respond`] or
//! incrementally with [`ResponseSession::start_response`]. The connection
//! side owns the matching [`SessionDriver`], writes the response and records
//! the terminal [`WriteOutcome`].
//!
//! ```text
//! Created -> Sending -> Succeeded | Failed | Cancelled
//! ```
//!
//! The status callback registered with [`ResponseSession::on_status`] runs
//! exactly once, whichever side reaches the terminal state first and in
//! whatever order registration and completion happen.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use http::Response;
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::protocol::pipe::{PipeReader, PipeWriter, body_pipe};
use crate::protocol::{HttpEntity, ResponseHead, SendError};
use crate::server::ServerError;
use crate::server::transfer_queue::{TransferDestination, TransferQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Created,
    Sending,
    Succeeded,
    Failed,
    Cancelled,
}

impl ResponseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ResponseState::Succeeded | ResponseState::Failed | ResponseState::Cancelled)
    }
}

/// How a response ended, as reported to the status callback.
#[derive(Debug)]
pub enum WriteOutcome {
    Succeeded,
    /// The write failed; [`SendError::RemoteClosed`] when the peer went away.
    Failed(SendError),
    /// The session was abandoned before the response was complete.
    Cancelled,
}

impl WriteOutcome {
    pub fn state(&self) -> ResponseState {
        match self {
            WriteOutcome::Succeeded => ResponseState::Succeeded,
            WriteOutcome::Failed(_) => ResponseState::Failed,
            WriteOutcome::Cancelled => ResponseState::Cancelled,
        }
    }
}

pub(crate) enum Command {
    Respond(Response<HttpEntity>),
    Stream(ResponseHead, PipeReader),
}

type StatusCallback = Box<dyn FnOnce(&WriteOutcome) + Send>;

enum CallbackSlot {
    Empty,
    Registered(StatusCallback),
    /// completed before anyone registered
    Pending(WriteOutcome),
    Delivered,
}

struct Shared {
    initiated: AtomicBool,
    completed: AtomicBool,
    abandoned: AtomicBool,
    state: watch::Sender<ResponseState>,
    callback: Mutex<CallbackSlot>,
}

impl Shared {
    fn new() -> Self {
        Self {
            initiated: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            state: watch::Sender::new(ResponseState::Created),
            callback: Mutex::new(CallbackSlot::Empty),
        }
    }

    fn slot(&self) -> MutexGuard<'_, CallbackSlot> {
        self.callback.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, outcome: WriteOutcome) -> bool {
        if self.completed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let state = outcome.state();
        debug!(?state, "response session finished");

        let mut slot = self.slot();
        match std::mem::replace(&mut *slot, CallbackSlot::Delivered) {
            CallbackSlot::Registered(callback) => {
                drop(slot);
                callback(&outcome);
            }
            _ => *slot = CallbackSlot::Pending(outcome),
        }

        self.state.send_replace(state);
        true
    }
}

/// Handler side of a response.
pub struct ResponseSession {
    shared: Arc<Shared>,
    command: Mutex<Option<oneshot::Sender<Command>>>,
    sink_capacity: usize,
    queue: TransferQueue,
}

impl fmt::Debug for ResponseSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSession").field("state", &self.state()).finish()
    }
}

impl ResponseSession {
    pub(crate) fn new(sink_capacity: usize, queue: TransferQueue) -> (ResponseSession, SessionDriver) {
        let shared = Arc::new(Shared::new());
        let (sender, receiver) = oneshot::channel();
        let session = ResponseSession { shared: Arc::clone(&shared), command: Mutex::new(Some(sender)), sink_capacity, queue };
        (session, SessionDriver { shared, command: receiver })
    }

    /// Sends the whole response at once.
    pub fn respond<B: Into<HttpEntity>>(&self, response: Response<B>) -> Result<(), ServerError> {
        self.initiate(Command::Respond(response.map(Into::into)))
    }

    /// Sends the head now and returns a sink for the body.
    ///
    /// Every [`ResponseSink::send`] reaches the peer as its own frame;
    /// [`ResponseSink::close`] ends the body.
    pub fn start_response(&self, head: ResponseHead) -> Result<ResponseSink, ServerError> {
        let (writer, reader) = body_pipe(self.sink_capacity);
        self.initiate(Command::Stream(head, reader))?;
        Ok(ResponseSink { pipe: Arc::new(writer), queue: self.queue.clone(), shared: Arc::clone(&self.shared), closed: false })
    }

    /// Registers the callback that receives the terminal outcome.
    ///
    /// If the response already finished the callback runs right away. A
    /// callback registered later replaces one that has not fired yet.
    pub fn on_status<F>(&self, callback: F)
    where
        F: FnOnce(&WriteOutcome) + Send + 'static,
    {
        let mut slot = self.shared.slot();
        match std::mem::replace(&mut *slot, CallbackSlot::Empty) {
            CallbackSlot::Pending(outcome) => {
                *slot = CallbackSlot::Delivered;
                drop(slot);
                callback(&outcome);
            }
            CallbackSlot::Delivered => {
                *slot = CallbackSlot::Delivered;
                debug!("status already delivered, callback ignored");
            }
            CallbackSlot::Empty | CallbackSlot::Registered(_) => *slot = CallbackSlot::Registered(Box::new(callback)),
        }
    }

    pub fn state(&self) -> ResponseState {
        *self.shared.state.borrow()
    }

    /// Watches the state transitions of this response.
    pub fn subscribe(&self) -> watch::Receiver<ResponseState> {
        self.shared.state.subscribe()
    }

    fn initiate(&self, command: Command) -> Result<(), ServerError> {
        if self.shared.initiated.swap(true, Ordering::AcqRel) {
            return Err(ServerError::ResponseAlreadyInitiated);
        }
        let sender = self.command.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(sender) = sender else {
            return Err(ServerError::ResponseAlreadyInitiated);
        };
        sender.send(command).map_err(|_command| io::Error::new(io::ErrorKind::BrokenPipe, "connection no longer waits for a response").into())
    }
}

/// Body sink of an incrementally written response.
///
/// Dropping the sink without [`close`](Self::close) cancels the response.
pub struct ResponseSink {
    pipe: Arc<PipeWriter>,
    queue: TransferQueue,
    shared: Arc<Shared>,
    closed: bool,
}

impl fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSink").field("pipe", &self.pipe).field("closed", &self.closed).finish()
    }
}

impl ResponseSink {
    /// Queues one frame and waits until the connection has taken it.
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<(), SendError> {
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }
        let destination: Arc<dyn TransferDestination> = Arc::clone(&self.pipe) as Arc<dyn TransferDestination>;
        self.queue.enqueue(destination, data).await.map_err(SendError::io)
    }

    /// Ends the body and waits for the terminal state of the response.
    pub async fn close(mut self) -> ResponseState {
        self.closed = true;
        self.pipe.close();

        let mut state = self.shared.state.subscribe();
        state.wait_for(|state| state.is_terminal()).await.map_or(ResponseState::Cancelled, |state| *state)
    }
}

impl Drop for ResponseSink {
    fn drop(&mut self) {
        if !self.closed {
            self.shared.abandoned.store(true, Ordering::Release);
            self.pipe.fail(&io::Error::new(io::ErrorKind::Interrupted, "response sink dropped before close"));
        }
    }
}

/// Connection side of a response.
///
/// Dropping the driver before completion cancels the session.
pub(crate) struct SessionDriver {
    shared: Arc<Shared>,
    command: oneshot::Receiver<Command>,
}

impl SessionDriver {
    /// Waits for the handler to initiate the response; `None` if the session was dropped first.
    ///
    /// Cancel safe, but must not be called again once it returned.
    pub(crate) async fn command(&mut self) -> Option<Command> {
        (&mut self.command).await.ok()
    }

    pub(crate) fn mark_sending(&self) {
        self.shared.state.send_if_modified(|state| {
            if *state == ResponseState::Created {
                *state = ResponseState::Sending;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        self.shared.abandoned.load(Ordering::Acquire)
    }

    pub(crate) fn complete(&self, outcome: WriteOutcome) -> bool {
        self.shared.complete(outcome)
    }
}

impl Drop for SessionDriver {
    fn drop(&mut self) {
        self.shared.complete(WriteOutcome::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn new_session() -> (ResponseSession, SessionDriver) {
        ResponseSession::new(1024, TransferQueue::new())
    }

    #[test]
    fn second_initiation_is_rejected() {
        let (session, _driver) = new_session();
        session.respond(Response::new("first")).unwrap();
        assert!(matches!(session.respond(Response::new("again")), Err(ServerError::ResponseAlreadyInitiated)));
        assert!(matches!(session.start_response(Response::new(())), Err(ServerError::ResponseAlreadyInitiated)));
    }

    #[test]
    fn callback_fires_once_when_registered_first() {
        let (session, driver) = new_session();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        session.on_status(move |outcome| {
            assert!(matches!(outcome, WriteOutcome::Succeeded));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(driver.complete(WriteOutcome::Succeeded));
        assert!(!driver.complete(WriteOutcome::Failed(SendError::RemoteClosed)));
        drop(driver);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), ResponseState::Succeeded);
    }

    #[test]
    fn callback_registered_late_sees_outcome() {
        let (session, driver) = new_session();
        drop(driver);

        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let counter = Arc::clone(&calls);
            session.on_status(move |outcome| {
                assert!(matches!(outcome, WriteOutcome::Cancelled));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn racing_completions_fire_once() {
        for _ in 0..64 {
            let (session, driver) = new_session();
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            session.on_status(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

            let driver = Arc::new(driver);
            let threads: Vec<_> = [WriteOutcome::Succeeded, WriteOutcome::Failed(SendError::RemoteClosed), WriteOutcome::Cancelled]
                .into_iter()
                .map(|outcome| {
                    let driver = Arc::clone(&driver);
                    std::thread::spawn(move || driver.complete(outcome))
                })
                .collect();
            let winners = threads.into_iter().map(|t| t.join().unwrap()).filter(|won| *won).count();

            assert_eq!(winners, 1);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn dropped_sink_cancels() {
        let (session, mut driver) = new_session();
        let sink = session.start_response(Response::new(())).unwrap();
        let Some(Command::Stream(_, _reader)) = driver.command().await else { panic!("expect stream command") };

        sink.send("event: 1\n\n").await.unwrap();
        drop(sink);
        assert!(driver.is_abandoned());
    }
}
