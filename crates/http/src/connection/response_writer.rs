use bytes::Bytes;
use futures::SinkExt;
use http::header::{CONNECTION, CONTENT_TYPE, DATE};
use http::{HeaderMap, HeaderValue, Method, Response, Version};
use http_body::Body;
use http_body_util::BodyExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedWrite;
use tracing::{debug, trace};

use crate::codec::ResponseEncoder;
use crate::negotiate::{BodyPolicy, negotiate};
use crate::protocol::entity::DEFAULT_CHUNK_SIZE;
use crate::protocol::{HttpEntity, Message, PayloadItem, PayloadSize, ResponseHead, SendError};
use crate::server::DateCache;

type ResponseMessage = Message<(ResponseHead, PayloadSize)>;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// What the response writer needs to know about the request it answers.
#[derive(Debug, Clone)]
pub(crate) struct Exchange {
    pub(crate) method: Method,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    /// head and the whole body in one flush
    Buffered,
    /// body read from the entity, sliced to the chunk size, flushed by backpressure
    Streaming,
    /// every produced frame is flushed on its own
    Delayed,
}

/// Writes responses onto the connection.
pub(crate) struct ResponseWriter<W> {
    framed: FramedWrite<W, ResponseEncoder>,
    write_buffer_size: usize,
}

impl<W: AsyncWrite + Unpin> ResponseWriter<W> {
    pub(crate) fn new(writer: W, write_buffer_size: usize) -> Self {
        let mut framed = FramedWrite::new(writer, ResponseEncoder::new());
        framed.set_backpressure_boundary(write_buffer_size);
        Self { framed, write_buffer_size }
    }

    pub(crate) async fn write_continue(&mut self) -> Result<(), SendError> {
        let writer = self.framed.get_mut();
        writer.write_all(CONTINUE).await?;
        writer.flush().await?;
        Ok(())
    }

    pub(crate) async fn shutdown(&mut self) -> Result<(), SendError> {
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }

    /// Writes `response` as the answer to `exchange` and returns whether the connection stays open.
    ///
    /// `delayed` marks a body produced incrementally by the handler: each of
    /// its frames reaches the peer as soon as it is produced.
    pub(crate) async fn write_response(
        &mut self,
        exchange: &Exchange,
        response: Response<HttpEntity>,
        delayed: bool,
        date: &DateCache,
    ) -> Result<bool, SendError> {
        let (mut parts, mut entity) = response.into_parts();

        let policy = BodyPolicy::for_response(&exchange.method, parts.status);
        if !policy.allows_body() && !entity.is_empty() {
            debug!(status = %parts.status, method = %exchange.method, "response can't carry a body, entity discarded");
            // dropping releases whatever stream the handler attached
            entity = HttpEntity::empty();
        }

        if let Some(content_type) = entity.content_type()
            && !parts.headers.contains_key(CONTENT_TYPE)
        {
            let value = HeaderValue::try_from(content_type).map_err(SendError::invalid_body)?;
            parts.headers.insert(CONTENT_TYPE, value);
        }
        if entity.is_composed() && entity.length().is_none() {
            entity = entity.materialize().await.map_err(SendError::invalid_body)?;
        }

        let mode = match &entity {
            HttpEntity::Empty | HttpEntity::Buffered(_) => WriteMode::Buffered,
            _ if delayed => WriteMode::Delayed,
            _ => WriteMode::Streaming,
        };

        parts.version = exchange.version;
        if !parts.headers.contains_key(DATE) {
            parts.headers.insert(DATE, date.header_value());
        }

        let payload_size = negotiate(&mut parts.headers, exchange.version, &entity.size_hint(), policy)?;

        let keep_alive = exchange.keep_alive && !payload_size.is_until_close() && !has_token(&parts.headers, "close");
        if !keep_alive {
            parts.headers.insert(CONNECTION, HeaderValue::from_static("close"));
        } else if exchange.version == Version::HTTP_10 {
            parts.headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }

        trace!(status = %parts.status, ?mode, ?payload_size, keep_alive, "writing response");
        let head = Response::from_parts(parts, ());
        self.framed.feed(ResponseMessage::Header((head, payload_size))).await?;

        match mode {
            WriteMode::Buffered => {
                let body = entity.into_bytes().await.map_err(SendError::invalid_body)?;
                if !body.is_empty() {
                    self.feed_chunk(body).await?;
                }
            }
            WriteMode::Streaming => {
                let chunk_size = self.chunk_size(payload_size);
                while let Some(mut data) = next_data(&mut entity).await? {
                    while !data.is_empty() {
                        let piece = data.split_to(chunk_size.min(data.len()));
                        self.feed_chunk(piece).await?;
                    }
                }
            }
            WriteMode::Delayed => {
                self.flush().await?;
                while let Some(data) = next_data(&mut entity).await? {
                    self.feed_chunk(data).await?;
                    self.flush().await?;
                }
            }
        }

        self.framed.feed(ResponseMessage::Payload(PayloadItem::Eof)).await?;
        self.flush().await?;
        Ok(keep_alive)
    }

    async fn feed_chunk(&mut self, data: Bytes) -> Result<(), SendError> {
        self.framed.feed(ResponseMessage::Payload(PayloadItem::Chunk(data))).await
    }

    async fn flush(&mut self) -> Result<(), SendError> {
        SinkExt::<ResponseMessage>::flush(&mut self.framed).await
    }

    /// Slice size for streamed bodies: the declared length when there is one, capped by the write buffer.
    fn chunk_size(&self, payload_size: PayloadSize) -> usize {
        let preferred = match payload_size {
            PayloadSize::Length(length) => usize::try_from(length).unwrap_or(usize::MAX),
            _ => DEFAULT_CHUNK_SIZE,
        };
        preferred.clamp(1, self.write_buffer_size.max(1))
    }
}

async fn next_data(entity: &mut HttpEntity) -> Result<Option<Bytes>, SendError> {
    loop {
        match entity.frame().await {
            None => return Ok(None),
            Some(Err(e)) => return Err(SendError::invalid_body(format!("can't read response body: {e}"))),
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data()
                    && !data.is_empty()
                {
                    return Ok(Some(data));
                }
            }
        }
    }
}

fn has_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}
