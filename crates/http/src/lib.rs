//! An embeddable HTTP/1.x transfer engine for tokio: a client and a server
//! sharing one message model and one set of codecs.
//!
//! The engine decides how bodies travel, which is the part that is easy to
//! get subtly wrong:
//!
//! - transfer negotiation: `Content-Length`, chunked or close-delimited, never two at once ([`negotiate`])
//! - client admission control, redirects with cookie folding, buffered or streamed responses ([`client`])
//! - server listeners sharing one transport, one-shot response sessions, bounded drain on dispose ([`server`])
//! - `Expect: 100-continue` handling and keep-alive on the server connection loop ([`connection`])
//!
//! # Example
//!
//! ```no_run
//! use std::convert::Infallible;
//!
//! use http::{Request, Response};
//! use micro_transfer::config::{ListenerConfig, ServerConfig};
//! use micro_transfer::protocol::body::ReqBody;
//! use micro_transfer::server::{HttpServer, make_handler};
//! use tracing::{Level, info};
//! use tracing_subscriber::FmtSubscriber;
//!
//! async fn hello(_request: Request<ReqBody>) -> Result<Response<&'static str>, Infallible> {
//!     Ok(Response::new("hello world"))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber)?;
//!
//!     let server = HttpServer::new(ServerConfig::default());
//!     let listener = server.add_listener("127.0.0.1:8080".parse()?, ListenerConfig::new()).await?;
//!     info!(addr = %listener.local_addr(), "start listening");
//!     listener.add_request_handler("/", make_handler(hello))?;
//!     server.start()?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     listener.dispose().await;
//!     server.stop();
//!     Ok(())
//! }
//! ```
//!
//! The client side:
//!
//! ```no_run
//! use http::Request;
//! use micro_transfer::client::{HttpClient, RequestOptions};
//! use micro_transfer::config::ClientConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(ClientConfig::default().with_max_connections(16));
//! let response = client.send(Request::get("http://127.0.0.1:8080/").body(())?, &RequestOptions::new()).await?;
//! let body = response.into_body().into_bytes().await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod negotiate;
pub mod protocol;
pub mod server;

mod utils;
pub(crate) use utils::ensure;
