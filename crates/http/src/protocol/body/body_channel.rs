use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt, channel::mpsc};
use http_body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tracing::{debug, error, info};

pub(crate) fn create_body_sender_receiver<S>(body_stream: &mut S, payload_size: PayloadSize) -> (ReqBodySender<'_, S>, ReqBody)
where
    S: Stream<Item = Result<Message<(RequestHeader, PayloadSize)>, ParseError>> + Unpin,
{
    let (signal_sender, signal_receiver) = mpsc::channel(8);
    let (data_sender, data_receiver) = mpsc::channel(8);
    let completed = Arc::new(AtomicBool::new(false));

    (
        ReqBodySender::new(body_stream, signal_receiver, data_sender, payload_size, Arc::clone(&completed)),
        ReqBody::new(signal_sender, data_receiver, payload_size, completed),
    )
}

pub(crate) enum BodyRequestSignal {
    RequestData,
}

/// How [`ReqBodySender::serve`] ended while the response was still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyServed {
    /// Nothing is left to serve or to watch.
    Idle,
    /// The peer hung up, or the connection failed, after the body was read.
    PeerClosed,
}

type RequestMessage = Message<(RequestHeader, PayloadSize)>;

/// Producer side: pulls payload items from the connection when the handler asks for them.
pub(crate) struct ReqBodySender<'conn, S> {
    payload_stream: &'conn mut S,
    signal_receiver: mpsc::Receiver<BodyRequestSignal>,
    data_sender: mpsc::Sender<Result<PayloadItem, ParseError>>,
    payload_size: PayloadSize,
    completed: Arc<AtomicBool>,
    eof: bool,
    signals_closed: bool,
    pipelined: Option<RequestMessage>,
}

impl<'conn, S> ReqBodySender<'conn, S>
where
    S: Stream<Item = Result<RequestMessage, ParseError>> + Unpin,
{
    fn new(
        payload_stream: &'conn mut S,
        signal_receiver: mpsc::Receiver<BodyRequestSignal>,
        data_sender: mpsc::Sender<Result<PayloadItem, ParseError>>,
        payload_size: PayloadSize,
        completed: Arc<AtomicBool>,
    ) -> Self {
        Self { payload_stream, signal_receiver, data_sender, payload_size, completed, eof: false, signals_closed: false, pipelined: None }
    }

    /// Serves data requests while the response is pending.
    ///
    /// Once the body was read to its end the connection is watched as well,
    /// so a peer that hangs up before the response is complete is noticed even
    /// when nothing is being written. A request head that arrives meanwhile is
    /// kept for [`take_pipelined`](Self::take_pipelined).
    pub(crate) async fn serve(&mut self) -> Result<BodyServed, ParseError> {
        if self.payload_size.is_empty() && !self.eof {
            // an empty payload ends without touching the wire
            self.skip_rest().await?;
        }

        loop {
            let serving = !self.signals_closed;
            let watching = self.eof && self.pipelined.is_none();

            tokio::select! {
                signal = self.signal_receiver.next(), if serving => match signal {
                    Some(BodyRequestSignal::RequestData) => self.serve_data().await?,
                    None => {
                        self.signals_closed = true;
                        if !self.eof {
                            self.skip_rest().await?;
                        }
                    }
                },
                message = self.payload_stream.next(), if watching => match message {
                    Some(Ok(message)) => self.pipelined = Some(message),
                    Some(Err(e)) => {
                        debug!(cause = %e, "connection failed while the response was pending");
                        return Ok(BodyServed::PeerClosed);
                    }
                    None => {
                        debug!("peer closed the connection while the response was pending");
                        return Ok(BodyServed::PeerClosed);
                    }
                },
                else => return Ok(BodyServed::Idle),
            }
        }
    }

    /// The next request head, if the peer sent it before this response was done.
    pub(crate) fn take_pipelined(&mut self) -> Option<RequestMessage> {
        self.pipelined.take()
    }

    async fn serve_data(&mut self) -> Result<(), ParseError> {
        let item = if self.eof { Ok(PayloadItem::Eof) } else { self.read_data().await };
        match item {
            Ok(payload_item) => {
                self.eof |= payload_item.is_eof();
                if let Err(e) = self.data_sender.send(Ok(payload_item)).await {
                    error!("failed to send payload body through channel, {}", e);
                    return Err(ParseError::invalid_body("send body data error"));
                }
                Ok(())
            }
            Err(e) => {
                error!("failed to read data from body stream, {}", e);
                let reason = e.to_string();
                if let Err(send_error) = self.data_sender.send(Err(e)).await {
                    error!("failed to send error through channel, {}", send_error);
                }
                Err(ParseError::invalid_body(reason))
            }
        }
    }

    async fn read_data(&mut self) -> Result<PayloadItem, ParseError> {
        match self.payload_stream.next().await {
            Some(Ok(Message::Payload(payload_item))) => Ok(payload_item),
            Some(Ok(Message::Header(_))) => {
                error!("should not receive header in ReqBodySender");
                Err(ParseError::invalid_body("should not receive header in ReqBodySender"))
            }
            Some(Err(e)) => Err(e),
            None => Err(ParseError::io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof))),
        }
    }

    /// Reads and discards the body up to its end.
    async fn skip_rest(&mut self) -> Result<(), ParseError> {
        let mut size: usize = 0;
        while !self.eof {
            match self.read_data().await? {
                PayloadItem::Eof => self.eof = true,
                PayloadItem::Chunk(bytes) => size += bytes.len(),
            }
        }
        if size > 0 {
            info!(size = size, "skip request body");
        }
        Ok(())
    }

    /// Marks the exchange complete and drains whatever the handler did not read.
    ///
    /// Draining keeps the connection positioned at the next request.
    pub(crate) async fn finish(&mut self) -> Result<(), ParseError> {
        self.completed.store(true, Ordering::Release);
        self.skip_rest().await
    }
}

/// Consumer side of the request body, handed to the handler.
///
/// Data is pulled from the connection on demand, one payload item per request.
/// Once the response for this request has completed, reading any data that was
/// not already delivered fails with [`ParseError::BodyReadAfterCompletion`].
#[derive(Debug)]
pub struct ReqBody {
    signal_sender: mpsc::Sender<BodyRequestSignal>,
    data_receiver: mpsc::Receiver<Result<PayloadItem, ParseError>>,
    payload_size: PayloadSize,
    completed: Arc<AtomicBool>,
    in_flight: bool,
    finished: bool,
}

impl std::fmt::Debug for BodyRequestSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RequestData")
    }
}

impl ReqBody {
    fn new(
        signal_sender: mpsc::Sender<BodyRequestSignal>,
        data_receiver: mpsc::Receiver<Result<PayloadItem, ParseError>>,
        payload_size: PayloadSize,
        completed: Arc<AtomicBool>,
    ) -> Self {
        Self { signal_sender, data_receiver, payload_size, completed, in_flight: false, finished: false }
    }

    pub fn payload_size(&self) -> PayloadSize {
        self.payload_size
    }

    fn on_item(&mut self, item: Result<PayloadItem, ParseError>) -> Poll<Option<Result<Frame<Bytes>, ParseError>>> {
        self.in_flight = false;
        match item {
            Ok(PayloadItem::Chunk(bytes)) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
            Ok(PayloadItem::Eof) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Err(e) => {
                self.finished = true;
                Poll::Ready(Some(Err(e)))
            }
        }
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if this.finished {
            return Poll::Ready(None);
        }

        if this.completed.load(Ordering::Acquire) {
            // only data delivered before completion may still be observed
            return match this.data_receiver.try_recv() {
                Ok(item) => this.on_item(item),
                Err(_empty_or_closed) => {
                    this.finished = true;
                    Poll::Ready(Some(Err(ParseError::BodyReadAfterCompletion)))
                }
            };
        }

        if !this.in_flight {
            match Pin::new(&mut this.signal_sender).poll_ready(cx) {
                Poll::Ready(Ok(())) => {
                    if let Err(e) = Pin::new(&mut this.signal_sender).start_send(BodyRequestSignal::RequestData) {
                        error!("failed to send request_more through channel, {}", e);
                        return Poll::Ready(Some(Err(ParseError::invalid_body("failed to send signal when receive body data"))));
                    }
                    this.in_flight = true;
                }
                Poll::Ready(Err(e)) => {
                    error!("failed to prepare request_more through channel, {}", e);
                    return Poll::Ready(Some(Err(ParseError::invalid_body("failed to send signal when receive body data"))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        match this.data_receiver.poll_next_unpin(cx) {
            Poll::Ready(Some(item)) => this.on_item(item),
            Poll::Ready(None) => {
                this.in_flight = false;
                this.finished = true;
                if this.completed.load(Ordering::Acquire) {
                    Poll::Ready(Some(Err(ParseError::BodyReadAfterCompletion)))
                } else {
                    Poll::Ready(Some(Err(ParseError::invalid_body("body stream should not receive None when receive data"))))
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.finished || self.payload_size.is_empty()
    }

    fn size_hint(&self) -> SizeHint {
        self.payload_size.into()
    }
}

impl From<SizeHint> for PayloadSize {
    fn from(size_hint: SizeHint) -> Self {
        match size_hint.exact() {
            Some(length) => PayloadSize::new_length(length),
            None => PayloadSize::new_chunked(),
        }
    }
}

impl From<PayloadSize> for SizeHint {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(length) => SizeHint::with_exact(length),
            PayloadSize::Chunked | PayloadSize::UntilClose => SizeHint::new(),
            PayloadSize::Empty => SizeHint::with_exact(0),
        }
    }
}
