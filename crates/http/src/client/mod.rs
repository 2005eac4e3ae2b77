//! The HTTP client.
//!
//! [`HttpClient`] runs each logical request as a series of attempts:
//!
//! 1. admission: one slot of the local concurrency limit per attempt ([`AdmissionController`])
//! 2. transfer negotiation and the exchange on a pooled or new connection
//! 3. redirect following with cookie folding ([`RedirectState`])
//!
//! Responses are either read completely before they are returned
//! ([`HttpClient::send`]) or returned at the head with the body streamed
//! through a bounded pipe ([`HttpClient::send_streaming`]).
//!
//! Transports, proxies and credentials come from the host through the
//! [`Connector`], [`ProxySelector`] and [`Authenticator`] traits.

mod admission;
mod connector;
mod cookie;
mod decompress;
mod error;
mod http_client;
mod options;
mod pool;
mod proxy;
mod redirect;

pub use admission::{AdmissionController, AdmissionPermit};
pub use connector::{BoxedTransport, Connector, Endpoint, TcpConnector, Transport};
pub use cookie::CookieSet;
pub use error::ClientError;
pub use http_client::{HttpClient, HttpClientBuilder, ResponseFuture};
pub use options::RequestOptions;
pub use proxy::{Authenticator, FixedProxy, NoProxy, ProxySelector, StaticCredentials};
pub use redirect::{RedirectState, RedirectStep, is_redirect};
