use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use http::header::{ACCEPT_ENCODING, AUTHORIZATION, CONNECTION, HOST};
use http::request::Parts;
use http::uri::PathAndQuery;
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri, Version};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::client::ClientError;
use crate::client::admission::{AdmissionController, AdmissionPermit};
use crate::client::connector::{Connector, Endpoint, TcpConnector};
use crate::client::decompress::{ACCEPT_ENCODING_VALUE, Decompressor};
use crate::client::options::{RequestOptions, ResolvedOptions};
use crate::client::pool::ConnectionPool;
use crate::client::proxy::{Authenticator, NoProxy, ProxySelector};
use crate::client::redirect::{RedirectState, RedirectStep, is_redirect};
use crate::config::ClientConfig;
use crate::connection::ClientConnection;
use crate::protocol::pipe::{PipeWriter, body_pipe};
use crate::protocol::{HttpEntity, PayloadSize, ResponseHead};

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consume {
    /// The whole body is read before the response is returned.
    Buffered,
    /// The response is returned once its head arrives; a task feeds the body pipe.
    Streaming,
}

/// An HTTP/1.x client.
///
/// Cloning is cheap; clones share the admission limit, the idle pool and
/// the running state.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    admission: AdmissionController,
    pool: ConnectionPool,
    connector: Arc<dyn Connector>,
    proxy: Arc<dyn ProxySelector>,
    authenticator: Option<Arc<dyn Authenticator>>,
    running: AtomicBool,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.inner.config)
            .field("connector", &self.inner.connector)
            .field("pool", &self.inner.pool)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

/// Assembles an [`HttpClient`] with its collaborators.
pub struct HttpClientBuilder {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    proxy: Arc<dyn ProxySelector>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl fmt::Debug for HttpClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientBuilder").field("config", &self.config).field("connector", &self.connector).finish_non_exhaustive()
    }
}

impl HttpClientBuilder {
    pub fn connector<C: Connector + 'static>(mut self, connector: C) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    pub fn proxy<P: ProxySelector + 'static>(mut self, proxy: P) -> Self {
        self.proxy = Arc::new(proxy);
        self
    }

    pub fn authenticator<A: Authenticator + 'static>(mut self, authenticator: A) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    pub fn build(self) -> HttpClient {
        let inner = ClientInner {
            admission: AdmissionController::new(self.config.max_connections()),
            pool: ConnectionPool::new(self.config.connection_idle_timeout()),
            config: self.config,
            connector: self.connector,
            proxy: self.proxy,
            authenticator: self.authenticator,
            running: AtomicBool::new(true),
        };
        HttpClient { inner: Arc::new(inner) }
    }
}

/// The head of a request as it goes out on each attempt.
#[derive(Debug, Clone)]
struct Outgoing {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
}

impl Outgoing {
    fn head(&self) -> Request<()> {
        let mut head = Request::new(());
        *head.method_mut() = self.method.clone();
        *head.uri_mut() = self.uri.clone();
        *head.version_mut() = self.version;
        *head.headers_mut() = self.headers.clone();
        head
    }
}

impl From<Request<()>> for Outgoing {
    fn from(head: Request<()>) -> Self {
        let (parts, ()) = head.into_parts();
        Self { method: parts.method, uri: parts.uri, version: parts.version, headers: parts.headers }
    }
}

impl HttpClient {
    /// A started client connecting over plain TCP without a proxy.
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> HttpClientBuilder {
        HttpClientBuilder { config, connector: Arc::new(TcpConnector), proxy: Arc::new(NoProxy), authenticator: None }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.inner.admission
    }

    pub fn start(&self) {
        self.inner.running.store(true, Ordering::Release);
    }

    /// Rejects new requests and closes idle connections. Requests in flight finish normally.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.pool.clear();
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Idle pooled connections.
    pub fn idle_connections(&self) -> usize {
        self.inner.pool.idle_count()
    }

    /// Sends `request` and waits for the whole response.
    pub async fn send<B: Into<HttpEntity>>(&self, request: Request<B>, options: &RequestOptions) -> Result<Response<HttpEntity>, ClientError> {
        self.execute(request.map(Into::into), options, Consume::Buffered).await
    }

    /// Sends `request` and returns as soon as the response head arrives.
    ///
    /// The body is fed through a bounded pipe of `response_buffer_size`
    /// bytes. It must be read to its end or dropped; until then the
    /// connection and the admission slot stay taken.
    pub async fn send_streaming<B: Into<HttpEntity>>(&self, request: Request<B>, options: &RequestOptions) -> Result<Response<HttpEntity>, ClientError> {
        self.execute(request.map(Into::into), options, Consume::Streaming).await
    }

    /// Sends `request` on its own task. The body is streamed when the client is configured for streaming.
    pub fn send_async<B: Into<HttpEntity>>(&self, request: Request<B>, options: RequestOptions) -> ResponseFuture {
        let client = self.clone();
        let request = request.map(Into::into);
        let consume = if self.inner.config.streaming_enabled() { Consume::Streaming } else { Consume::Buffered };
        let handle = tokio::spawn(async move { client.execute(request, &options, consume).await });
        ResponseFuture { handle }
    }

    async fn execute(&self, request: Request<HttpEntity>, options: &RequestOptions, consume: Consume) -> Result<Response<HttpEntity>, ClientError> {
        if !self.is_running() {
            return Err(ClientError::Stopped);
        }
        let options = options.resolve(&self.inner.config);
        let (mut parts, mut entity) = request.into_parts();
        // fail before any wire activity
        Endpoint::from_uri(&parts.uri)?;

        let mut redirects = RedirectState::new();
        loop {
            let response = self.attempt(&parts, &mut entity, &options, consume).await?;
            if !options.follow_redirects || !is_redirect(response.status(), response.headers()) {
                return Ok(response);
            }

            let (head, body) = response.into_parts();
            match redirects.follow(&mut parts, &mut entity, head.status, &head.headers, options.redirect_policy, options.max_redirects)? {
                // a streamed redirect body is dropped here, which stops its feeder
                RedirectStep::Follow => drop(body),
                RedirectStep::Exceeded => {
                    let response = Box::new(Response::from_parts(head, body));
                    return Err(ClientError::MaxRedirectsExceeded { max_redirects: options.max_redirects, response });
                }
            }
        }
    }

    /// One attempt: admission, then the exchange within the request timeout.
    async fn attempt(&self, parts: &Parts, entity: &mut HttpEntity, options: &ResolvedOptions, consume: Consume) -> Result<Response<HttpEntity>, ClientError> {
        let permit = self.inner.admission.acquire(options.timeout).await?;

        let endpoint = Endpoint::from_uri(&parts.uri)?;
        let proxy = self.inner.proxy.select(&parts.uri);
        let mut head = Outgoing { method: parts.method.clone(), uri: parts.uri.clone(), version: parts.version, headers: parts.headers.clone() };
        self.prepare(&mut head, options)?;
        if proxy.is_none() {
            head.uri = origin_form(&parts.uri);
        }
        let route = proxy.unwrap_or(endpoint);

        let exchange = self.exchange(&route, head, entity, options, consume, permit);
        match timeout(options.timeout, exchange).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ClientError::ResponseTimeout { timeout: options.timeout }),
        }
    }

    fn prepare(&self, head: &mut Outgoing, options: &ResolvedOptions) -> Result<(), ClientError> {
        if !head.headers.contains_key(HOST) {
            let authority = head.uri.authority().ok_or_else(|| ClientError::malformed_uri("request uri has no authority"))?;
            let host = HeaderValue::from_str(authority.as_str()).map_err(ClientError::malformed_uri)?;
            head.headers.insert(HOST, host);
        }
        if options.decompress && !head.headers.contains_key(ACCEPT_ENCODING) {
            head.headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(ACCEPT_ENCODING_VALUE));
        }
        if !self.inner.config.use_persistent_connections() {
            head.headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        if let Some(authenticator) = &self.inner.authenticator {
            let mut request = head.head();
            authenticator.decorate(&mut request);
            *head = Outgoing::from(request);
        }
        Ok(())
    }

    async fn exchange(
        &self,
        route: &Endpoint,
        mut head: Outgoing,
        entity: &mut HttpEntity,
        options: &ResolvedOptions,
        consume: Consume,
        permit: AdmissionPermit,
    ) -> Result<Response<HttpEntity>, ClientError> {
        let mut challenged = false;
        loop {
            let (mut connection, response_head, payload_size) = self.roundtrip(route, &head, entity).await?;

            if response_head.status() == StatusCode::UNAUTHORIZED
                && !challenged
                && let Some(authenticator) = &self.inner.authenticator
                && let Some(authorization) = authenticator.on_challenge(&head.head(), &response_head)
                && entity.is_replayable()
            {
                debug!(uri = %head.uri, "answering authentication challenge");
                challenged = true;
                self.drain(route, connection).await?;
                entity.reset()?;
                head.headers.insert(AUTHORIZATION, authorization);
                continue;
            }

            let (mut parts, ()) = response_head.into_parts();
            let decompressor = if options.decompress && !payload_size.is_empty() { Decompressor::from_headers(&mut parts.headers)? } else { None };

            let body = match consume {
                Consume::Buffered => {
                    let bytes = read_body(&mut connection, decompressor).await?;
                    self.finish(route, connection);
                    permit.release();
                    HttpEntity::buffered(bytes)
                }
                Consume::Streaming if payload_size.is_empty() => {
                    self.finish(route, connection);
                    permit.release();
                    HttpEntity::empty()
                }
                Consume::Streaming => {
                    let length = if decompressor.is_none() { payload_size.length() } else { None };
                    self.stream_body(route.clone(), connection, decompressor, permit, length)
                }
            };
            return Ok(Response::from_parts(parts, body));
        }
    }

    /// Sends the request and reads the response head, retrying once on a fresh
    /// connection when a pooled one turns out to be dead.
    async fn roundtrip(&self, route: &Endpoint, head: &Outgoing, entity: &mut HttpEntity) -> Result<(ClientConnection, ResponseHead, PayloadSize), ClientError> {
        let mut connection = self.checkout(route).await?;
        match Self::send_on(&mut connection, head, entity).await {
            Ok((response_head, payload_size)) => Ok((connection, response_head, payload_size)),
            Err(e) if connection.is_reused() && e.is_stale_connection() && entity.is_replayable() => {
                debug!(cause = %e, %route, "pooled connection was closed by the peer, retrying on a new one");
                entity.reset()?;
                let mut connection = self.connect(route).await?;
                let (response_head, payload_size) = Self::send_on(&mut connection, head, entity).await?;
                Ok((connection, response_head, payload_size))
            }
            Err(e) => Err(e),
        }
    }

    async fn send_on(connection: &mut ClientConnection, head: &Outgoing, entity: &mut HttpEntity) -> Result<(ResponseHead, PayloadSize), ClientError> {
        connection.send_request(head.head(), entity).await?;
        connection.read_head().await
    }

    async fn checkout(&self, route: &Endpoint) -> Result<ClientConnection, ClientError> {
        if self.inner.config.use_persistent_connections()
            && let Some(mut connection) = self.inner.pool.checkout(route)
        {
            connection.mark_reused();
            return Ok(connection);
        }
        self.connect(route).await
    }

    async fn connect(&self, route: &Endpoint) -> Result<ClientConnection, ClientError> {
        let connect_timeout = self.inner.config.connect_timeout();
        let transport = match timeout(connect_timeout, self.inner.connector.connect(route)).await {
            Ok(transport) => transport?,
            Err(_elapsed) => return Err(io::Error::new(io::ErrorKind::TimedOut, format!("connect to {route} timed out after {connect_timeout:?}")).into()),
        };
        Ok(ClientConnection::new(transport, self.inner.config.header_limits(), WRITE_BUFFER_SIZE))
    }

    /// Returns a connection whose exchange is complete to the idle pool, or drops it.
    fn finish(&self, route: &Endpoint, connection: ClientConnection) {
        finish_connection(&self.inner, route, connection);
    }

    /// Reads and discards the rest of a response we don't hand out.
    async fn drain(&self, route: &Endpoint, mut connection: ClientConnection) -> Result<(), ClientError> {
        let mut skipped = 0;
        while let Some(chunk) = connection.read_chunk().await? {
            skipped += chunk.len();
        }
        trace!(skipped, "discarded response body");
        self.finish(route, connection);
        Ok(())
    }

    fn stream_body(&self, route: Endpoint, mut connection: ClientConnection, decompressor: Option<Decompressor>, permit: AdmissionPermit, length: Option<u64>) -> HttpEntity {
        let (writer, reader) = body_pipe(self.inner.config.response_buffer_size());
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            match pump(&mut connection, decompressor, &writer).await {
                Ok(()) => {
                    writer.close();
                    finish_connection(&inner, &route, connection);
                }
                Err(e) => {
                    debug!(cause = %e, %route, "streamed response body ended early");
                    writer.fail(&io::Error::other(e.to_string()));
                }
            }
            permit.release();
        });
        HttpEntity::streaming(reader, length)
    }
}

fn finish_connection(inner: &ClientInner, route: &Endpoint, connection: ClientConnection) {
    if inner.config.use_persistent_connections() && inner.running.load(Ordering::Acquire) && connection.is_reusable() {
        inner.pool.checkin(route.clone(), connection);
    }
}

/// Copies the response body into the pipe until it ends or the reader goes away.
async fn pump(connection: &mut ClientConnection, mut decompressor: Option<Decompressor>, writer: &PipeWriter) -> Result<(), ClientError> {
    while let Some(chunk) = connection.read_chunk().await? {
        let data = match &mut decompressor {
            Some(decompressor) => decompressor.decode(&chunk)?,
            None => chunk,
        };
        if !data.is_empty() {
            writer.write_all(data).await?;
        }
    }
    if let Some(decompressor) = decompressor {
        let rest = decompressor.finish()?;
        if !rest.is_empty() {
            writer.write_all(rest).await?;
        }
    }
    Ok(())
}

async fn read_body(connection: &mut ClientConnection, mut decompressor: Option<Decompressor>) -> Result<Bytes, ClientError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = connection.read_chunk().await? {
        match &mut decompressor {
            Some(decompressor) => body.extend_from_slice(&decompressor.decode(&chunk)?),
            None => body.extend_from_slice(&chunk),
        }
    }
    if let Some(decompressor) = decompressor {
        body.extend_from_slice(&decompressor.finish()?);
    }
    Ok(body.freeze())
}

fn origin_form(uri: &Uri) -> Uri {
    let path_and_query = uri.path_and_query().cloned().unwrap_or_else(|| PathAndQuery::from_static("/"));
    Uri::from(path_and_query)
}

/// A response being produced by a spawned task, see [`HttpClient::send_async`].
#[derive(Debug)]
pub struct ResponseFuture {
    handle: JoinHandle<Result<Response<HttpEntity>, ClientError>>,
}

impl ResponseFuture {
    /// Abandons the request; its admission slot and connection are released.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response<HttpEntity>, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| joined.unwrap_or_else(|e| Err(io::Error::other(e).into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::proxy::{MockAuthenticator, MockProxySelector};
    use async_trait::async_trait;
    use http::uri::Scheme;
    use indoc::indoc;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;

    use crate::client::BoxedTransport;

    /// Hands out in-memory transports and gives the test the peer ends.
    #[derive(Debug)]
    struct DuplexConnector {
        peers: mpsc::UnboundedSender<(Endpoint, DuplexStream)>,
    }

    #[async_trait]
    impl Connector for DuplexConnector {
        async fn connect(&self, endpoint: &Endpoint) -> io::Result<BoxedTransport> {
            let (transport, peer) = tokio::io::duplex(64 * 1024);
            self.peers.send((endpoint.clone(), peer)).map_err(|_closed| io::Error::from(io::ErrorKind::ConnectionRefused))?;
            Ok(Box::new(transport))
        }
    }

    fn duplex_builder(config: ClientConfig) -> (HttpClientBuilder, mpsc::UnboundedReceiver<(Endpoint, DuplexStream)>) {
        let (peers, received) = mpsc::unbounded_channel();
        (HttpClient::builder(config).connector(DuplexConnector { peers }), received)
    }

    /// Reads one request head (and nothing after it).
    async fn read_request(peer: &mut DuplexStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            peer.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        String::from_utf8(head).unwrap()
    }

    #[tokio::test]
    async fn proxied_request_uses_absolute_form() {
        let (builder, mut peers) = duplex_builder(ClientConfig::default());
        let mut proxy = MockProxySelector::new();
        proxy.expect_select().times(1).returning(|_| Some(Endpoint::new(Scheme::HTTP, "proxy.test", 3128)));
        let client = builder.proxy(proxy).build();

        let server = tokio::spawn(async move {
            let (endpoint, mut peer) = peers.recv().await.unwrap();
            let head = read_request(&mut peer).await;
            peer.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await.unwrap();
            (endpoint, head)
        });

        let response = client.send(Request::get("http://origin.test/a?b=1").body(()).unwrap(), &RequestOptions::new()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let (endpoint, head) = server.await.unwrap();
        assert_eq!(endpoint.host(), "proxy.test");
        assert!(head.starts_with("GET http://origin.test/a?b=1 HTTP/1.1\r\n"));
        assert!(head.contains("host: origin.test\r\n"));
    }

    #[tokio::test]
    async fn answers_one_challenge() {
        let (builder, mut peers) = duplex_builder(ClientConfig::default().with_persistent_connections(false));
        let mut authenticator = MockAuthenticator::new();
        authenticator.expect_decorate().times(1).return_const(());
        authenticator.expect_on_challenge().times(1).returning(|_, _| Some(HeaderValue::from_static("Bearer secret")));
        let client = builder.authenticator(authenticator).build();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        let server = tokio::spawn(async move {
            for status in ["401 Unauthorized", "200 OK"] {
                let (_, mut peer) = peers.recv().await.unwrap();
                let request = read_request(&mut peer).await;
                recorded.lock().unwrap().push(request);
                peer.write_all(format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\n\r\n").as_bytes()).await.unwrap();
            }
        });

        let response = client.send(Request::get("http://a.test/private").body(()).unwrap(), &RequestOptions::new()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        server.await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(!seen[0].contains("authorization"));
        assert!(seen[1].contains("authorization: Bearer secret\r\n"));
    }

    #[tokio::test]
    async fn second_challenge_is_returned() {
        let (builder, mut peers) = duplex_builder(ClientConfig::default().with_persistent_connections(false));
        let mut authenticator = MockAuthenticator::new();
        authenticator.expect_decorate().return_const(());
        authenticator.expect_on_challenge().times(1).returning(|_, _| Some(HeaderValue::from_static("Bearer wrong")));
        let client = builder.authenticator(authenticator).build();

        tokio::spawn(async move {
            while let Some((_, mut peer)) = peers.recv().await {
                read_request(&mut peer).await;
                peer.write_all(b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\n\r\n").await.unwrap();
            }
        });

        let response = client.send(Request::get("http://a.test/").body(()).unwrap(), &RequestOptions::new()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn keep_alive_connection_is_pooled_and_reused() {
        let (builder, mut peers) = duplex_builder(ClientConfig::default());
        let client = builder.build();

        let server = tokio::spawn(async move {
            let (_, mut peer) = peers.recv().await.unwrap();
            for body in ["one", "two"] {
                read_request(&mut peer).await;
                peer.write_all(format!("HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\n{body}").as_bytes()).await.unwrap();
            }
            // a second connection would show up here
            peers.try_recv().is_err()
        });

        for expected in ["one", "two"] {
            let response = client.send(Request::get("http://a.test/").body(()).unwrap(), &RequestOptions::new()).await.unwrap();
            assert_eq!(response.into_body().into_bytes().await.unwrap(), expected);
        }
        assert_eq!(client.idle_connections(), 1);
        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn stale_pooled_connection_is_retried() {
        let (builder, mut peers) = duplex_builder(ClientConfig::default());
        let client = builder.build();

        tokio::spawn(async move {
            let (_, mut first) = peers.recv().await.unwrap();
            read_request(&mut first).await;
            first.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await.unwrap();
            drop(first);

            let (_, mut second) = peers.recv().await.unwrap();
            read_request(&mut second).await;
            second.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nfresh").await.unwrap();
        });

        client.send(Request::get("http://a.test/").body(()).unwrap(), &RequestOptions::new()).await.unwrap();
        let response = client.send(Request::post("http://a.test/").body("data").unwrap(), &RequestOptions::new()).await.unwrap();
        assert_eq!(response.into_body().into_bytes().await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn stopped_client_rejects() {
        let client = HttpClient::default();
        client.stop();
        let result = client.send(Request::get("http://a.test/").body(()).unwrap(), &RequestOptions::new()).await;
        assert!(matches!(result, Err(ClientError::Stopped)));
        client.start();
        assert!(client.is_running());
    }

    #[tokio::test]
    async fn relative_uri_is_malformed() {
        let client = HttpClient::default();
        let result = client.send(Request::get("/only-a-path").body(()).unwrap(), &RequestOptions::new()).await;
        assert!(matches!(result, Err(ClientError::MalformedUri { .. })));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (builder, mut peers) = duplex_builder(ClientConfig::default());
        let client = builder.build();
        let (held, mut keep) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (_, peer) = peers.recv().await.unwrap();
            held.send(peer).unwrap();
        });

        let options = RequestOptions::new().timeout(std::time::Duration::from_millis(50));
        let result = client.send(Request::get("http://a.test/").body(()).unwrap(), &options).await;
        assert!(matches!(result, Err(ClientError::ResponseTimeout { .. })));
        assert!(keep.recv().await.is_some());
    }

    #[tokio::test]
    async fn gzip_body_is_decoded_in_both_modes() {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"compressed payload").unwrap();
        let compressed = encoder.finish().unwrap();

        let (builder, mut peers) = duplex_builder(ClientConfig::default().with_persistent_connections(false));
        let client = builder.build();
        tokio::spawn(async move {
            while let Some((_, mut peer)) = peers.recv().await {
                let head = read_request(&mut peer).await;
                assert!(head.contains("accept-encoding: gzip, deflate, br, zstd\r\n"));
                let response_head = format!("HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n", compressed.len());
                peer.write_all(response_head.as_bytes()).await.unwrap();
                peer.write_all(&compressed).await.unwrap();
            }
        });

        let buffered = client.send(Request::get("http://a.test/").body(()).unwrap(), &RequestOptions::new()).await.unwrap();
        assert!(!buffered.headers().contains_key(http::header::CONTENT_ENCODING));
        assert_eq!(buffered.into_body().into_bytes().await.unwrap(), "compressed payload");

        let streamed = client.send_streaming(Request::get("http://a.test/").body(()).unwrap(), &RequestOptions::new()).await.unwrap();
        assert_eq!(streamed.into_body().into_bytes().await.unwrap(), "compressed payload");
    }

    #[test]
    fn origin_form_drops_authority() {
        assert_eq!(origin_form(&"http://a.test/x?y=1".parse().unwrap()), "/x?y=1");
        assert_eq!(origin_form(&"http://a.test".parse().unwrap()), "/");
    }

    #[tokio::test]
    async fn send_async_completes_on_its_own_task() {
        let (builder, mut peers) = duplex_builder(ClientConfig::default());
        let client = builder.build();
        tokio::spawn(async move {
            let (_, mut peer) = peers.recv().await.unwrap();
            read_request(&mut peer).await;
            let response = indoc! {"
            HTTP/1.1 200 OK
            Content-Length: 5

            async"};
            peer.write_all(response.as_bytes()).await.unwrap();
        });

        let response = client.send_async(Request::get("http://a.test/").body(()).unwrap(), RequestOptions::new()).await.unwrap();
        assert_eq!(response.into_body().into_bytes().await.unwrap(), "async");
    }
}
