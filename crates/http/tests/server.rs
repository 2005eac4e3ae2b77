use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use micro_transfer::config::{ListenerConfig, ServerConfig};
use micro_transfer::protocol::ParseError;
use micro_transfer::protocol::body::ReqBody;
use micro_transfer::protocol::HttpEntity;
use micro_transfer::server::{
    Handler, HandlerContext, HttpServer, Listener, PathParams, ResponseSession, ResponseState, RouteOptions, StageOutcome, WriteOutcome, make_handler,
    stage_fn,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn serve<H: Handler + 'static>(path: &str, handler: H, config: ListenerConfig) -> (HttpServer, Arc<Listener>) {
    init_tracing();
    let server = HttpServer::new(ServerConfig::default());
    let listener = server.add_listener("127.0.0.1:0".parse().unwrap(), config).await.unwrap();
    listener.add_request_handler(path, handler).unwrap();
    server.start().unwrap();
    (server, listener)
}

/// Writes `request` and reads until the server closes the connection.
async fn exchange(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8(response).unwrap()
}

async fn echo(request: Request<ReqBody>) -> Result<Response<Bytes>, ParseError> {
    let body = request.into_body().collect().await?.to_bytes();
    Ok(Response::new(body))
}

#[tokio::test]
async fn no_content_discards_offered_entity() {
    let handler = make_handler(|_request: Request<ReqBody>| async {
        let response = Response::builder().status(StatusCode::NO_CONTENT).body("should never be sent").unwrap();
        Ok::<_, Infallible>(response)
    });
    let (_server, listener) = serve("/empty", handler, ListenerConfig::new()).await;

    let response = exchange(listener.local_addr(), "GET /empty HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"));
    assert!(response.ends_with("\r\n\r\n"));
    assert!(!response.contains("should never be sent"));
    assert!(!response.contains("content-length"));
    assert!(!response.contains("transfer-encoding"));
    assert!(response.contains("date: "));
}

#[tokio::test]
async fn continue_is_sent_before_the_body_is_needed() {
    let (_server, listener) = serve("/echo", make_handler(echo), ListenerConfig::new()).await;

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    stream.write_all(b"POST /echo HTTP/1.1\r\nHost: test\r\nExpect: continue\r\nContent-Length: 5\r\nConnection: close\r\n\r\n").await.unwrap();

    let mut interim = [0u8; 25];
    timeout(Duration::from_secs(5), stream.read_exact(&mut interim)).await.unwrap().unwrap();
    assert_eq!(&interim, b"HTTP/1.1 100 Continue\r\n\r\n");

    stream.write_all(b"hello").await.unwrap();
    let mut rest = String::new();
    stream.read_to_string(&mut rest).await.unwrap();
    assert!(rest.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(rest.contains("content-length: 5\r\n"));
    assert!(rest.ends_with("hello"));
}

#[tokio::test]
async fn unknown_expectation_is_refused_without_calling_the_handler() {
    let invoked = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&invoked);
    let handler = make_handler(move |_request: Request<ReqBody>| {
        flag.store(true, Ordering::SeqCst);
        async { Ok::<_, Infallible>(Response::new("called")) }
    });
    let (_server, listener) = serve("/echo", handler, ListenerConfig::new()).await;

    let response = exchange(listener.local_addr(), "POST /echo HTTP/1.1\r\nHost: test\r\nExpect: bogus\r\nContent-Length: 5\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 417 Expectation Failed\r\n"));
    assert!(response.contains("connection: close\r\n"));
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn unknown_path_and_method() {
    init_tracing();
    let handler = make_handler(|_request: Request<ReqBody>| async { Ok::<_, Infallible>(Response::new("ok")) });
    let server = HttpServer::new(ServerConfig::default());
    let listener = server.add_listener("127.0.0.1:0".parse().unwrap(), ListenerConfig::new()).await.unwrap();
    listener.add_route("/items/{id}", RouteOptions::new().method(http::Method::GET), handler).unwrap();
    server.start().unwrap();

    let missing = exchange(listener.local_addr(), "GET /nothing HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"));

    let wrong_method = exchange(listener.local_addr(), "DELETE /items/7 HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(wrong_method.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    assert!(wrong_method.contains("allow: GET\r\n"));
}

#[tokio::test]
async fn encoded_paths_are_decoded_before_routing() {
    let handler = make_handler(|request: Request<ReqBody>| async move {
        let id = request.extensions().get::<PathParams>().and_then(|params| params.get("id")).unwrap_or_default().to_owned();
        Ok::<_, Infallible>(Response::new(id))
    });
    let (_server, listener) = serve("/items/{id}", handler, ListenerConfig::new()).await;
    let addr = listener.local_addr();

    let spaced = exchange(addr, "GET /items/a%20b HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(spaced.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(spaced.ends_with("\r\n\r\na b"));

    let literal = exchange(addr, "GET /it%65ms/7 HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(literal.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(literal.ends_with("\r\n\r\n7"));

    let malformed = exchange(addr, "GET /items/%FF HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(malformed.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[tokio::test]
async fn pipelined_requests_are_answered_in_order() {
    let (_server, listener) = serve("/echo", make_handler(echo), ListenerConfig::new()).await;

    let response = exchange(
        listener.local_addr(),
        "POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nfirstGET /echo HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(response.matches("HTTP/1.1 200 OK\r\n").count(), 2);
    let first = response.find("first").unwrap();
    let second = response.rfind("HTTP/1.1 200 OK\r\n").unwrap();
    assert!(first < second);
}

#[tokio::test]
async fn stages_run_in_order_and_may_answer_first() {
    let tagging = stage_fn("tag", |request| {
        request.headers_mut().insert("x-stage", http::HeaderValue::from_static("tagged"));
        StageOutcome::Continue
    });
    let guard = stage_fn("guard", |request| {
        if request.headers().contains_key("x-token") && request.headers().contains_key("x-stage") {
            return StageOutcome::Continue;
        }
        let mut response = Response::new(HttpEntity::empty());
        *response.status_mut() = StatusCode::UNAUTHORIZED;
        StageOutcome::Respond(response)
    });
    let handler = make_handler(|request: Request<ReqBody>| async move {
        let context = request.extensions().get::<HandlerContext>().cloned();
        let tag = request.headers()["x-stage"].to_str().unwrap_or_default().to_owned();
        let id = request.extensions().get::<PathParams>().and_then(|params| params.get("id")).unwrap_or_default().to_owned();
        let owner = context.as_ref().and_then(|context| context.get::<&'static str>()).copied().unwrap_or_default();
        Ok::<_, Infallible>(Response::new(format!("{tag} {id} {owner}")))
    });

    let config = ListenerConfig::new().with_stage(tagging).with_stage(guard);
    let server = HttpServer::new(ServerConfig::default());
    let listener = server.add_listener("127.0.0.1:0".parse().unwrap(), config).await.unwrap();
    listener.add_route("/items/{id}", RouteOptions::new().value("inventory"), handler).unwrap();
    server.start().unwrap();

    let rejected = exchange(listener.local_addr(), "POST /items/3 HTTP/1.1\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbody").await;
    assert!(rejected.starts_with("HTTP/1.1 401 Unauthorized\r\n"));

    let admitted = exchange(listener.local_addr(), "GET /items/3 HTTP/1.1\r\nX-Token: t\r\nConnection: close\r\n\r\n").await;
    assert!(admitted.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(admitted.ends_with("tagged 3 inventory"));
}

#[tokio::test]
async fn logical_listeners_are_dispatched_by_local_address() {
    let server = HttpServer::new(ServerConfig::default());
    let bound: SocketAddr = "10.0.0.1:80".parse().unwrap();
    let listener = server.add_logical_listener(bound, ListenerConfig::new()).unwrap();
    listener.add_request_handler("/", make_handler(|_request: Request<ReqBody>| async { Ok::<_, Infallible>(Response::new("logical")) })).unwrap();
    let remote: SocketAddr = "10.0.0.9:40000".parse().unwrap();

    for (local, expected) in [(bound, "HTTP/1.1 200 OK\r\n"), ("10.0.0.2:80".parse().unwrap(), "HTTP/1.1 503 Service Unavailable\r\n")] {
        let (client, server_side) = tokio::io::duplex(8 * 1024);
        let (reader, writer) = tokio::io::split(server_side);
        let (mut client_reader, mut client_writer) = tokio::io::split(client);

        let talk = async move {
            client_writer.write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();
            let mut response = String::new();
            client_reader.read_to_string(&mut response).await.unwrap();
            response
        };
        let (served, response) = tokio::join!(server.serve_connection(reader, writer, local, remote), talk);

        assert!(served.is_ok());
        assert!(response.starts_with(expected), "{local}: {response}");
    }
}

/// Holds each request until released, counting the ones it has seen.
struct Gate {
    seen: Arc<AtomicUsize>,
    hold: Duration,
}

#[async_trait]
impl Handler for Gate {
    async fn handle(&self, _request: Request<ReqBody>, session: ResponseSession) {
        self.seen.fetch_add(1, Ordering::SeqCst);
        sleep(self.hold).await;
        let _ = session.respond(Response::new("done"));
    }
}

async fn wait_for_active(listener: &Listener, active: usize) {
    timeout(Duration::from_secs(5), async {
        while listener.active_requests() < active {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn dispose_waits_for_in_flight_requests() {
    let seen = Arc::new(AtomicUsize::new(0));
    let gate = Gate { seen: Arc::clone(&seen), hold: Duration::from_millis(300) };
    let (_server, listener) = serve("/", gate, ListenerConfig::new().with_dispose_timeout(Duration::from_secs(5))).await;
    let addr = listener.local_addr();

    let clients: Vec<_> = (0..3).map(|_| tokio::spawn(exchange(addr, "GET / HTTP/1.1\r\nConnection: close\r\n\r\n"))).collect();
    wait_for_active(&listener, 3).await;

    assert!(listener.dispose().await);
    assert_eq!(listener.active_requests(), 0);
    assert_eq!(seen.load(Ordering::SeqCst), 3);

    for client in clients {
        assert!(client.await.unwrap().ends_with("done"));
    }
}

#[tokio::test]
async fn dispose_gives_up_after_its_timeout() {
    let gate = Gate { seen: Arc::new(AtomicUsize::new(0)), hold: Duration::from_secs(3600) };
    let (_server, listener) = serve("/", gate, ListenerConfig::new().with_dispose_timeout(Duration::from_millis(200))).await;
    let addr = listener.local_addr();

    let _client = tokio::spawn(exchange(addr, "GET / HTTP/1.1\r\n\r\n"));
    wait_for_active(&listener, 1).await;

    let started = Instant::now();
    assert!(!listener.dispose().await);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(200));
    assert!(waited < Duration::from_secs(2));
}

/// Streams until the peer goes away and reports every status callback it gets.
struct Firehose {
    callbacks: Arc<AtomicUsize>,
    outcome: Mutex<Option<oneshot::Sender<ResponseState>>>,
}

#[async_trait]
impl Handler for Firehose {
    async fn handle(&self, _request: Request<ReqBody>, session: ResponseSession) {
        let callbacks = Arc::clone(&self.callbacks);
        session.on_status(move |outcome: &WriteOutcome| {
            callbacks.fetch_add(1, Ordering::SeqCst);
            assert!(!matches!(outcome, WriteOutcome::Succeeded));
        });

        let Ok(sink) = session.start_response(Response::new(())) else {
            return;
        };
        let chunk = Bytes::from(vec![b'x'; 64 * 1024]);
        while sink.send(chunk.clone()).await.is_ok() {}

        let state = sink.close().await;
        if let Some(sender) = self.outcome.lock().unwrap().take() {
            let _ = sender.send(state);
        }
    }
}

#[tokio::test]
async fn peer_disconnect_completes_the_session_once() {
    let callbacks = Arc::new(AtomicUsize::new(0));
    let (sender, receiver) = oneshot::channel();
    let handler = Firehose { callbacks: Arc::clone(&callbacks), outcome: Mutex::new(Some(sender)) };
    let (_server, listener) = serve("/stream", handler, ListenerConfig::new()).await;

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    stream.write_all(b"GET /stream HTTP/1.1\r\n\r\n").await.unwrap();
    let mut head = [0u8; 1024];
    let n = stream.read(&mut head).await.unwrap();
    assert!(head[..n].starts_with(b"HTTP/1.1 200 OK\r\n"));
    drop(stream);

    let state = timeout(Duration::from_secs(10), receiver).await.unwrap().unwrap();
    assert!(matches!(state, ResponseState::Failed | ResponseState::Cancelled));

    sleep(Duration::from_millis(50)).await;
    assert_eq!(callbacks.load(Ordering::SeqCst), 1);
}

/// Sends one frame, then stays quiet until the response ends.
struct IdleStream {
    callbacks: Arc<AtomicUsize>,
    outcome: Mutex<Option<oneshot::Sender<bool>>>,
}

#[async_trait]
impl Handler for IdleStream {
    async fn handle(&self, _request: Request<ReqBody>, session: ResponseSession) {
        let callbacks = Arc::clone(&self.callbacks);
        let outcome = self.outcome.lock().unwrap().take();
        session.on_status(move |status: &WriteOutcome| {
            callbacks.fetch_add(1, Ordering::SeqCst);
            let remote_closed = matches!(status, WriteOutcome::Failed(e) if e.is_remote_closed());
            if let Some(sender) = outcome {
                let _ = sender.send(remote_closed);
            }
        });

        let Ok(sink) = session.start_response(Response::new(())) else {
            return;
        };
        sink.send("data: 1\n\n").await.unwrap();

        let mut state = session.subscribe();
        let _ = state.wait_for(|state| state.is_terminal()).await;
        assert_eq!(session.state(), ResponseState::Failed);
        assert!(sink.send("data: 2\n\n").await.is_err());
    }
}

#[tokio::test]
async fn peer_disconnect_settles_an_idle_delayed_response() {
    let callbacks = Arc::new(AtomicUsize::new(0));
    let (sender, receiver) = oneshot::channel();
    let handler = IdleStream { callbacks: Arc::clone(&callbacks), outcome: Mutex::new(Some(sender)) };
    let (_server, listener) = serve("/events", handler, ListenerConfig::new()).await;

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    stream.write_all(b"GET /events HTTP/1.1\r\n\r\n").await.unwrap();
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    while !String::from_utf8_lossy(&received).contains("data: 1") {
        let n = timeout(Duration::from_secs(5), stream.read(&mut buf)).await.unwrap().unwrap();
        assert!(n > 0);
        received.extend_from_slice(&buf[..n]);
    }
    assert!(received.starts_with(b"HTTP/1.1 200 OK\r\n"));
    wait_for_active(&listener, 1).await;
    drop(stream);

    let remote_closed = timeout(Duration::from_secs(5), receiver).await.unwrap().unwrap();
    assert!(remote_closed);

    timeout(Duration::from_secs(5), async {
        while listener.active_requests() > 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(callbacks.load(Ordering::SeqCst), 1);
}
