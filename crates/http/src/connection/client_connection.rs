use std::fmt;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::header::{CONNECTION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Request, Version};
use http_body::Body;
use http_body_util::BodyExt;
use tokio::io::{ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{trace, warn};

use crate::client::{BoxedTransport, ClientError};
use crate::codec::{HeaderLimits, RequestEncoder, ResponseDecoder};
use crate::negotiate::{BodyPolicy, negotiate};
use crate::protocol::{HttpEntity, Message, ParseError, PayloadItem, PayloadSize, ResponseHead, SendError};

type RequestMessage = Message<(Request<()>, PayloadSize)>;

/// One client side HTTP/1.1 connection: writes a request, then reads its response.
///
/// Exchanges are strictly sequential. A connection is only worth keeping
/// once the response body was read to its end and both sides agreed to
/// keep it open, see [`is_reusable`](Self::is_reusable).
pub struct ClientConnection {
    reader: FramedRead<ReadHalf<BoxedTransport>, ResponseDecoder>,
    writer: FramedWrite<WriteHalf<BoxedTransport>, RequestEncoder>,
    reused: bool,
    request_close: bool,
    response_keep_alive: bool,
    body_done: bool,
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection").field("reused", &self.reused).field("body_done", &self.body_done).finish_non_exhaustive()
    }
}

impl ClientConnection {
    pub fn new(transport: BoxedTransport, limits: HeaderLimits, write_buffer_size: usize) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        let mut writer = FramedWrite::new(write_half, RequestEncoder::new());
        writer.set_backpressure_boundary(write_buffer_size.max(1));
        Self {
            reader: FramedRead::new(read_half, ResponseDecoder::with_limits(limits)),
            writer,
            reused: false,
            request_close: false,
            response_keep_alive: false,
            body_done: true,
        }
    }

    /// Whether this connection already carried an exchange before the current one.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub(crate) fn mark_reused(&mut self) {
        self.reused = true;
    }

    /// Whether another request may follow on this connection.
    pub fn is_reusable(&self) -> bool {
        self.body_done && self.response_keep_alive && !self.request_close
    }

    /// Writes the request head and the whole `entity`.
    ///
    /// The framing headers of `head` are negotiated from the entity first.
    pub async fn send_request(&mut self, mut head: Request<()>, entity: &mut HttpEntity) -> Result<(), ClientError> {
        if let Some(content_type) = entity.content_type()
            && !head.headers().contains_key(CONTENT_TYPE)
        {
            let value = HeaderValue::try_from(content_type).map_err(|e| SendError::invalid_body(e.to_string()))?;
            head.headers_mut().insert(CONTENT_TYPE, value);
        }

        let policy = BodyPolicy::for_request(head.method());
        let version = head.version();
        let payload_size = negotiate(head.headers_mut(), version, &entity.size_hint(), policy)?;

        self.request_close = version == Version::HTTP_10 || has_token(head.headers(), "close");
        self.reader.decoder_mut().set_request_method(head.method().clone());
        self.body_done = false;

        trace!(method = %head.method(), uri = %head.uri(), ?payload_size, "sending request");
        self.writer.feed(RequestMessage::Header((head, payload_size))).await?;

        if !payload_size.is_empty() {
            while let Some(data) = next_data(entity).await? {
                self.writer.feed(RequestMessage::Payload(PayloadItem::Chunk(data))).await?;
            }
        }
        self.writer.feed(RequestMessage::Payload(PayloadItem::Eof)).await?;
        SinkExt::<RequestMessage>::flush(&mut self.writer).await?;
        Ok(())
    }

    /// Reads the final response head, skipping interim `1xx` responses.
    pub async fn read_head(&mut self) -> Result<(ResponseHead, PayloadSize), ClientError> {
        loop {
            match self.reader.next().await {
                Some(Ok(Message::Header((head, payload_size)))) => {
                    if head.status().is_informational() {
                        trace!(status = %head.status(), "skipping interim response");
                        self.skip_interim_body().await?;
                        continue;
                    }
                    self.response_keep_alive = is_keep_alive(&head) && !payload_size.is_until_close();
                    self.body_done = payload_size.is_empty() && self.consume_eof().await?;
                    return Ok((head, payload_size));
                }
                Some(Ok(Message::Payload(_))) => return Err(ParseError::invalid_body("body bytes before a response head").into()),
                Some(Err(e)) => return Err(e.into()),
                None => {
                    warn!("connection closed before a response head arrived");
                    return Err(ClientError::RemoteConnectionClosed);
                }
            }
        }
    }

    /// Next body chunk of the current response, `None` at its end.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>, ClientError> {
        if self.body_done {
            return Ok(None);
        }
        match self.reader.next().await {
            Some(Ok(Message::Payload(PayloadItem::Chunk(data)))) => Ok(Some(data)),
            Some(Ok(Message::Payload(PayloadItem::Eof))) => {
                self.body_done = true;
                Ok(None)
            }
            Some(Ok(Message::Header(_))) => Err(ParseError::invalid_body("response head inside a body").into()),
            Some(Err(e)) => Err(e.into()),
            None => Err(ClientError::RemoteConnectionClosed),
        }
    }

    async fn skip_interim_body(&mut self) -> Result<(), ClientError> {
        self.body_done = false;
        while self.read_chunk().await?.is_some() {}
        Ok(())
    }

    /// Takes the `Eof` that follows a bodiless head.
    async fn consume_eof(&mut self) -> Result<bool, ClientError> {
        match self.reader.next().await {
            Some(Ok(Message::Payload(PayloadItem::Eof))) => Ok(true),
            Some(Ok(_)) => Err(ParseError::invalid_body("bodiless response carried body bytes").into()),
            Some(Err(e)) => Err(e.into()),
            None => Err(ClientError::RemoteConnectionClosed),
        }
    }
}

async fn next_data(entity: &mut HttpEntity) -> Result<Option<Bytes>, SendError> {
    while let Some(frame) = entity.frame().await {
        let frame = frame.map_err(|e| SendError::invalid_body(format!("can't read request body: {e}")))?;
        if let Ok(data) = frame.into_data()
            && !data.is_empty()
        {
            return Ok(Some(data));
        }
    }
    Ok(None)
}

fn is_keep_alive(head: &ResponseHead) -> bool {
    match head.version() {
        Version::HTTP_11 => !has_token(head.headers(), "close"),
        Version::HTTP_10 => has_token(head.headers(), "keep-alive"),
        _ => false,
    }
}

fn has_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use indoc::indoc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn connection() -> (ClientConnection, DuplexStream) {
        let (transport, peer) = tokio::io::duplex(64 * 1024);
        (ClientConnection::new(Box::new(transport), HeaderLimits::default(), 8 * 1024), peer)
    }

    async fn read_available(peer: &mut DuplexStream) -> String {
        let mut buf = vec![0; 4096];
        let n = peer.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn post_then_length_response() {
        let (mut connection, mut peer) = connection();
        let head = Request::post("/submit").header("Host", "a.test").body(()).unwrap();
        let mut entity = HttpEntity::buffered("hello");
        connection.send_request(head, &mut entity).await.unwrap();

        let sent = read_available(&mut peer).await;
        assert!(sent.starts_with("POST /submit HTTP/1.1\r\n"));
        assert!(sent.contains("content-length: 5\r\n"));
        assert!(sent.ends_with("\r\n\r\nhello"));

        let response = indoc! {"
        HTTP/1.1 100 Continue

        HTTP/1.1 200 OK
        Content-Length: 2

        ok"};
        peer.write_all(response.as_bytes()).await.unwrap();

        let (head, payload_size) = connection.read_head().await.unwrap();
        assert_eq!(head.status(), StatusCode::OK);
        assert_eq!(payload_size, PayloadSize::Length(2));
        assert!(!connection.is_reusable());
        assert_eq!(connection.read_chunk().await.unwrap().unwrap(), Bytes::from_static(b"ok"));
        assert!(connection.read_chunk().await.unwrap().is_none());
        assert!(connection.is_reusable());
    }

    #[tokio::test]
    async fn head_response_ignores_length() {
        let (mut connection, mut peer) = connection();
        let head = Request::builder().method(Method::HEAD).uri("/").body(()).unwrap();
        connection.send_request(head, &mut HttpEntity::empty()).await.unwrap();
        assert_eq!(read_available(&mut peer).await, "HEAD / HTTP/1.1\r\n\r\n");

        peer.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n").await.unwrap();
        let (_, payload_size) = connection.read_head().await.unwrap();
        assert!(payload_size.is_empty());
        assert!(connection.read_chunk().await.unwrap().is_none());
        assert!(connection.is_reusable());
    }

    #[tokio::test]
    async fn close_before_head_is_remote_closed() {
        let (mut connection, peer) = connection();
        drop(peer);
        assert!(matches!(connection.read_head().await, Err(ClientError::RemoteConnectionClosed)));
    }

    #[tokio::test]
    async fn close_delimited_response_is_not_reused() {
        let (mut connection, mut peer) = connection();
        connection.send_request(Request::get("/").body(()).unwrap(), &mut HttpEntity::empty()).await.unwrap();
        read_available(&mut peer).await;

        peer.write_all(b"HTTP/1.0 200 OK\r\n\r\nall of it").await.unwrap();
        peer.shutdown().await.unwrap();

        let (_, payload_size) = connection.read_head().await.unwrap();
        assert!(payload_size.is_until_close());
        let mut body = Vec::new();
        while let Some(chunk) = connection.read_chunk().await.unwrap() {
            body.extend_from_slice(&chunk);
        }
        assert_eq!(body, b"all of it");
        assert!(!connection.is_reusable());
    }
}
