use std::error::Error;
use std::net::SocketAddr;

use async_trait::async_trait;
use http::{Extensions, Request, Response, StatusCode};
use tracing::error;

use crate::protocol::HttpEntity;
use crate::protocol::body::ReqBody;
use crate::server::ResponseSession;

/// Application code invoked for each routed request.
///
/// The handler runs on its own task. It answers through `session`, either
/// right away or later from any task; dropping the session without answering
/// makes the connection reply `500`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: Request<ReqBody>, session: ResponseSession);
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut, B, E> Handler for HandlerFn<F>
where
    F: Fn(Request<ReqBody>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<B>, E>> + Send,
    B: Into<HttpEntity> + Send,
    E: Into<Box<dyn Error + Send + Sync>> + Send,
{
    async fn handle(&self, request: Request<ReqBody>, session: ResponseSession) {
        let response = match (self.f)(request).await {
            Ok(response) => response.map(Into::into),
            Err(e) => {
                let e: Box<dyn Error + Send + Sync> = e.into();
                error!(cause = %e, "handler failed");
                let mut response = Response::new(HttpEntity::empty());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        };

        if let Err(e) = session.respond(response) {
            error!(cause = %e, "can't send handler response");
        }
    }
}

/// Adapts an async function returning a complete response into a [`Handler`].
pub fn make_handler<F, Fut, B, E>(f: F) -> HandlerFn<F>
where
    F: Fn(Request<ReqBody>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<B>, E>> + Send,
    B: Into<HttpEntity>,
    E: Into<Box<dyn Error + Send + Sync>>,
{
    HandlerFn { f }
}

/// Values captured when a handler is registered.
///
/// Inserted into the extensions of every request routed to that handler.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    listener_addr: SocketAddr,
    values: Extensions,
}

impl HandlerContext {
    pub(crate) fn new(listener_addr: SocketAddr, values: Extensions) -> Self {
        Self { listener_addr, values }
    }

    pub fn listener_addr(&self) -> SocketAddr {
        self.listener_addr
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get::<T>()
    }
}
