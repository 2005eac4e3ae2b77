use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use http::header::ALLOW;
use http::{HeaderValue, Response, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::select;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use crate::codec::RequestDecoder;
use crate::connection::response_writer::{Exchange, ResponseWriter};
use crate::protocol::body::{BodyServed, create_body_sender_receiver};
use crate::protocol::{HttpEntity, HttpError, Message, ParseError, PayloadSize, RequestHeader, SendError};
use crate::server::{Command, DateCache, ResponseSession, ServerError, ServerShared, SessionDriver, StageOutcome, WriteOutcome};

/// One server side connection.
///
/// Requests are read one at a time. For each request the connection resolves
/// the listener from its local address, applies the listener's stages, routes
/// to a handler running on its own task, and writes whatever the handler
/// answers through its [`ResponseSession`]. While the handler runs the
/// connection also feeds it the request body on demand, and watches for the
/// peer going away.
pub(crate) struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    // a request head read while the previous response was still pending
    pipelined: Option<Message<(RequestHeader, PayloadSize)>>,
    writer: ResponseWriter<W>,
    server: Arc<ServerShared>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(reader: R, writer: W, server: Arc<ServerShared>, local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        let config = &server.config;
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::with_limits(config.header_limits()), config.read_buffer_size()),
            writer: ResponseWriter::new(writer, config.write_buffer_size()),
            pipelined: None,
            local_addr,
            remote_addr,
            server,
        }
    }

    pub(crate) async fn process(mut self) -> Result<(), HttpError> {
        debug!(remote = %self.remote_addr, local = %self.local_addr, "connection opened");
        let mut shutdown = self.server.shutdown.subscribe();

        loop {
            let next = match self.pipelined.take() {
                Some(message) => Some(Ok(message)),
                None => select! {
                    biased;
                    _ = shutdown.wait_for(|stopped| *stopped) => {
                        debug!(remote = %self.remote_addr, "server stopped, closing idle connection");
                        break;
                    }
                    next = self.framed_read.next() => next,
                },
            };

            match next {
                Some(Ok(Message::Header((header, payload_size)))) => {
                    if !self.do_process(header, payload_size).await? {
                        break;
                    }
                }

                Some(Ok(Message::Payload(_))) => {
                    error!("received payload while expecting a request head");
                    return Err(ParseError::invalid_body("expect request head but received payload").into());
                }

                Some(Err(e)) => {
                    warn!(remote = %self.remote_addr, cause = %e, "can't decode request");
                    let status = match e {
                        ParseError::TooLargeHeader { .. } | ParseError::TooManyHeaders { .. } => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
                        ParseError::Io { .. } => None,
                        _ => Some(StatusCode::BAD_REQUEST),
                    };
                    if let Some(status) = status {
                        let exchange = Exchange { method: http::Method::GET, version: Version::HTTP_11, keep_alive: false };
                        if let Err(write_error) = self.writer.write_response(&exchange, status_response(status), false, &self.server.date).await {
                            debug!(cause = %write_error, "can't send error response");
                        }
                    }
                    return Err(e.into());
                }

                None => {
                    debug!(remote = %self.remote_addr, "peer closed the connection");
                    return Ok(());
                }
            }
        }

        if let Err(e) = self.writer.shutdown().await {
            debug!(cause = %e, "can't shut down the connection");
        }
        Ok(())
    }

    /// Serves one request; returns whether the connection stays open.
    async fn do_process(&mut self, mut header: RequestHeader, payload_size: PayloadSize) -> Result<bool, HttpError> {
        let mut exchange = Exchange {
            method: header.method().clone(),
            version: header.version(),
            keep_alive: self.server.config.use_persistent_connections() && header.is_keep_alive(),
        };

        let Some(listener) = self.server.dispatcher.resolve(self.local_addr) else {
            warn!(local = %self.local_addr, "no listener bound to local address");
            if header.expect().is_some() {
                // the body won't come before a 100, so it can't be skipped
                exchange.keep_alive = false;
            } else {
                self.skip_body(payload_size).await?;
            }
            let error = ServerError::NoListenerForAddress { addr: self.local_addr };
            return Ok(self.writer.write_response(&exchange, error_response(&error), false, &self.server.date).await?);
        };

        if exchange.version == Version::HTTP_11
            && let Some(expect) = header.expect()
        {
            if is_continue(expect) {
                self.writer.write_continue().await?;
                info!(remote = %self.remote_addr, "received expect request header, sent continue response");
            } else {
                info!(remote = %self.remote_addr, ?expect, "unsupported expectation, responding 417");
                exchange.keep_alive = false;
                let response = status_response(StatusCode::EXPECTATION_FAILED);
                self.writer.write_response(&exchange, response, false, &self.server.date).await?;
                return Ok(false);
            }
        }

        for stage in listener.stages() {
            if let StageOutcome::Respond(response) = stage.apply(&mut header) {
                debug!(?stage, status = %response.status(), "request answered by stage");
                self.skip_body(payload_size).await?;
                return Ok(self.writer.write_response(&exchange, response, false, &self.server.date).await?);
            }
        }

        let route = match listener.route(header.method(), header.uri().path()) {
            Ok(route) => route,
            Err(e) => {
                debug!(method = %header.method(), path = header.uri().path(), cause = %e, "can't dispatch request");
                self.skip_body(payload_size).await?;
                return Ok(self.writer.write_response(&exchange, error_response(&e), false, &self.server.date).await?);
            }
        };

        let active = Arc::new(listener.track_request());
        let (mut body_sender, req_body) = create_body_sender_receiver(&mut self.framed_read, payload_size);

        let mut request = header.body(req_body);
        request.extensions_mut().insert(route.context);
        request.extensions_mut().insert(route.params);

        let (session, mut driver) = ResponseSession::new(self.server.config.body_channel_capacity(), self.server.queue.clone());
        let handler = route.handler;
        let handler_active = Arc::clone(&active);
        tokio::spawn(async move {
            handler.handle(request, session).await;
            drop(handler_active);
        });

        let mut body_failed = false;
        let mut peer_closed = false;
        let written = {
            let body_future = body_sender.serve();
            let respond_future = respond(&mut self.writer, &exchange, &mut driver, &self.server.date);
            tokio::pin!(body_future, respond_future);

            let mut serving = true;
            loop {
                select! {
                    biased;
                    written = &mut respond_future => break written,
                    served = &mut body_future, if serving => {
                        serving = false;
                        match served {
                            Ok(BodyServed::Idle) => {}
                            Ok(BodyServed::PeerClosed) => {
                                peer_closed = true;
                                break false;
                            }
                            Err(e) => {
                                warn!(cause = %e, "can't read request body");
                                body_failed = true;
                            }
                        }
                    }
                }
            }
        };

        if peer_closed {
            // the pending write was dropped with its entity, so the handler's sink is closed too
            debug!(remote = %self.remote_addr, "peer went away before the response was complete");
            driver.complete(WriteOutcome::Failed(SendError::RemoteClosed));
            drop(active);
            return Ok(false);
        }

        let keep_alive = written && !body_failed;
        if keep_alive {
            body_sender.finish().await?;
            self.pipelined = body_sender.take_pipelined();
        }
        drop(active);
        Ok(keep_alive)
    }

    async fn skip_body(&mut self, payload_size: PayloadSize) -> Result<(), ParseError> {
        let (mut body_sender, _body) = create_body_sender_receiver(&mut self.framed_read, payload_size);
        body_sender.finish().await
    }
}

/// Waits for the handler's answer, writes it and settles the session.
///
/// Returns whether the connection stays open.
async fn respond<W>(writer: &mut ResponseWriter<W>, exchange: &Exchange, driver: &mut SessionDriver, date: &DateCache) -> bool
where
    W: AsyncWrite + Unpin,
{
    let (response, delayed, dropped) = match driver.command().await {
        Some(Command::Respond(response)) => (response, false, false),
        Some(Command::Stream(head, reader)) => (head.map(|()| HttpEntity::streaming(reader, None)), true, false),
        None => {
            error!("handler dropped the response session without responding");
            (status_response(StatusCode::INTERNAL_SERVER_ERROR), false, true)
        }
    };

    driver.mark_sending();
    match writer.write_response(exchange, response, delayed, date).await {
        Ok(keep_alive) => {
            driver.complete(if dropped { WriteOutcome::Cancelled } else { WriteOutcome::Succeeded });
            keep_alive
        }
        Err(e) if driver.is_abandoned() => {
            debug!(cause = %e, "response sink dropped before close");
            driver.complete(WriteOutcome::Cancelled);
            false
        }
        Err(e) => {
            if e.is_remote_closed() {
                debug!("peer closed the connection while writing the response");
            } else {
                warn!(cause = %e, "can't write response");
            }
            driver.complete(WriteOutcome::Failed(e));
            false
        }
    }
}

/// `100-continue` and its short form, case-insensitively.
fn is_continue(expect: &HeaderValue) -> bool {
    let value = expect.as_bytes().trim_ascii();
    value.eq_ignore_ascii_case(b"100-continue") || value.eq_ignore_ascii_case(b"continue")
}

fn status_response(status: StatusCode) -> Response<HttpEntity> {
    let mut response = Response::new(HttpEntity::empty());
    *response.status_mut() = status;
    response
}

fn error_response(error: &ServerError) -> Response<HttpEntity> {
    let mut response = status_response(error.status_code());
    if let ServerError::MethodNotAllowed { allowed, .. } = error {
        let allowed = allowed.iter().map(http::Method::as_str).collect::<Vec<_>>().join(", ");
        if let Ok(value) = HeaderValue::try_from(allowed) {
            response.headers_mut().insert(ALLOW, value);
        }
    }
    response
}
