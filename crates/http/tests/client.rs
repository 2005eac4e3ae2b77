use std::convert::Infallible;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::stream;
use http::header::{COOKIE, LOCATION, SET_COOKIE, TRANSFER_ENCODING};
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use micro_transfer::client::{ClientError, HttpClient, RequestOptions};
use micro_transfer::config::{ClientConfig, ListenerConfig, ServerConfig};
use micro_transfer::protocol::body::ReqBody;
use micro_transfer::protocol::{HttpEntity, ParseError};
use micro_transfer::server::{HttpServer, Listener, make_handler};
use tokio::time::{sleep, timeout};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn server() -> (HttpServer, Arc<Listener>) {
    init_tracing();
    let server = HttpServer::new(ServerConfig::default());
    let listener = server.add_listener("127.0.0.1:0".parse().unwrap(), ListenerConfig::new()).await.unwrap();
    server.start().unwrap();
    (server, listener)
}

fn url(listener: &Listener, path: &str) -> String {
    format!("http://{}{path}", listener.local_addr())
}

fn redirect(location: &str, cookies: &[&str]) -> Response<HttpEntity> {
    let mut builder = Response::builder().status(StatusCode::FOUND).header(LOCATION, location);
    for cookie in cookies {
        builder = builder.header(SET_COOKIE, *cookie);
    }
    builder.body(HttpEntity::empty()).unwrap()
}

#[tokio::test]
async fn endless_redirects_stop_after_the_bound() {
    let (_server, listener) = server().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let handler = make_handler(move |_request: Request<ReqBody>| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, Infallible>(redirect("/loop", &[])) }
    });
    listener.add_request_handler("/loop", handler).unwrap();

    let client = HttpClient::new(ClientConfig::default());
    for max_redirects in [0, 3] {
        hits.store(0, Ordering::SeqCst);
        let options = RequestOptions::new().max_redirects(max_redirects);
        let result = client.send(Request::get(url(&listener, "/loop")).body(()).unwrap(), &options).await;

        match result {
            Err(ClientError::MaxRedirectsExceeded { response, .. }) => assert_eq!(response.status(), StatusCode::FOUND),
            other => panic!("expected the redirect bound to be hit, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), max_redirects + 1);
    }
}

#[tokio::test]
async fn disabled_redirects_return_the_redirect() {
    let (_server, listener) = server().await;
    listener.add_request_handler("/moved", make_handler(|_request: Request<ReqBody>| async { Ok::<_, Infallible>(redirect("/elsewhere", &[])) })).unwrap();

    let client = HttpClient::new(ClientConfig::default().with_follow_redirects(false));
    let response = client.send(Request::get(url(&listener, "/moved")).body(()).unwrap(), &RequestOptions::new()).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/elsewhere");
}

#[tokio::test]
async fn cookies_fold_across_redirects() {
    let (_server, listener) = server().await;
    listener.add_request_handler("/first", make_handler(|_request: Request<ReqBody>| async { Ok::<_, Infallible>(redirect("/second", &["a=1; Path=/"])) })).unwrap();
    listener
        .add_request_handler("/second", make_handler(|_request: Request<ReqBody>| async { Ok::<_, Infallible>(redirect("/final", &["a=2", "b=3; HttpOnly"])) }))
        .unwrap();

    let seen = Arc::new(Mutex::new(None));
    let recorder = Arc::clone(&seen);
    let handler = make_handler(move |request: Request<ReqBody>| {
        let cookie = request.headers().get(COOKIE).and_then(|value| value.to_str().ok()).map(str::to_owned);
        *recorder.lock().unwrap() = cookie;
        async { Ok::<_, Infallible>(Response::new("landed")) }
    });
    listener.add_request_handler("/final", handler).unwrap();

    let client = HttpClient::new(ClientConfig::default());
    let response = client.send(Request::get(url(&listener, "/first")).body(()).unwrap(), &RequestOptions::new()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.into_body().into_bytes().await.unwrap(), "landed");
    assert_eq!(seen.lock().unwrap().as_deref(), Some("a=2; b=3"));
}

#[tokio::test]
async fn temporary_redirect_resends_the_body() {
    let (_server, listener) = server().await;
    let handler = make_handler(|_request: Request<ReqBody>| async {
        let response = Response::builder().status(StatusCode::TEMPORARY_REDIRECT).header(LOCATION, "/new").body(HttpEntity::empty()).unwrap();
        Ok::<_, Infallible>(response)
    });
    listener.add_request_handler("/old", handler).unwrap();
    let echo = make_handler(|request: Request<ReqBody>| async move {
        let method = request.method().clone();
        let body = request.into_body().collect().await?.to_bytes();
        Ok::<_, ParseError>(Response::new(format!("{method} {}", String::from_utf8_lossy(&body))))
    });
    listener.add_request_handler("/new", echo).unwrap();

    let client = HttpClient::new(ClientConfig::default());
    let response = client.send(Request::post(url(&listener, "/old")).body("payload").unwrap(), &RequestOptions::new()).await.unwrap();
    assert_eq!(response.into_body().into_bytes().await.unwrap(), "POST payload");
}

fn five_megabytes() -> Bytes {
    (0..5 * 1024 * 1024).map(|i| u8::try_from(i % 251).unwrap()).collect::<Vec<u8>>().into()
}

#[tokio::test]
async fn buffered_and_streamed_bodies_are_identical() {
    let (_server, listener) = server().await;
    let data = five_megabytes();
    let served = data.clone();
    let handler = make_handler(move |_request: Request<ReqBody>| {
        let chunks: Vec<io::Result<Bytes>> = served.chunks(64 * 1024).map(|chunk| Ok(served.slice_ref(chunk))).collect();
        async move { Ok::<_, Infallible>(Response::new(HttpEntity::from_stream(stream::iter(chunks), None))) }
    });
    listener.add_request_handler("/large", handler).unwrap();

    let client = HttpClient::new(ClientConfig::default());
    let options = RequestOptions::new();

    let buffered = client.send(Request::get(url(&listener, "/large")).body(()).unwrap(), &options).await.unwrap();
    assert_eq!(buffered.headers()[TRANSFER_ENCODING], "chunked");
    let buffered = buffered.into_body().into_bytes().await.unwrap();

    let streamed = client.send_streaming(Request::get(url(&listener, "/large")).body(()).unwrap(), &options).await.unwrap();
    assert!(streamed.body().is_streaming());
    let streamed = streamed.into_body().into_bytes().await.unwrap();

    assert_eq!(buffered.len(), data.len());
    assert_eq!(buffered, data);
    assert_eq!(streamed, buffered);
}

#[tokio::test]
async fn admission_rejects_while_the_only_slot_is_taken() {
    let (_server, listener) = server().await;
    let arrived = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&arrived);
    let slow = make_handler(move |_request: Request<ReqBody>| {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            sleep(Duration::from_millis(400)).await;
            Ok::<_, Infallible>(Response::new("slow"))
        }
    });
    listener.add_request_handler("/slow", slow).unwrap();
    listener.add_request_handler("/fast", make_handler(|_request: Request<ReqBody>| async { Ok::<_, Infallible>(Response::new("fast")) })).unwrap();

    let client = HttpClient::new(ClientConfig::default().with_max_connections(1));

    let first = client.send_async(Request::get(url(&listener, "/slow")).body(()).unwrap(), RequestOptions::new());
    timeout(Duration::from_secs(5), async {
        while arrived.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let options = RequestOptions::new().timeout(Duration::from_millis(100));
    let second = client.send(Request::get(url(&listener, "/fast")).body(()).unwrap(), &options).await;
    assert!(matches!(second, Err(ClientError::AdmissionRejected { .. })), "{second:?}");

    let first = first.await.unwrap();
    assert_eq!(first.into_body().into_bytes().await.unwrap(), "slow");
    assert_eq!(client.admission().available(), Some(1));

    let third = client.send(Request::get(url(&listener, "/fast")).body(()).unwrap(), &RequestOptions::new()).await.unwrap();
    assert_eq!(third.into_body().into_bytes().await.unwrap(), "fast");
}
