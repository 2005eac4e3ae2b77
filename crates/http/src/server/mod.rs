//! The server side of the engine.
//!
//! ```text
//! HttpServer ── Dispatcher ── local addr ──> Listener ── stages ──> routes ──> Handler
//!                                                                                │
//!                 connection <── SessionDriver <── ResponseSession <─────────────┘
//! ```
//!
//! - [`HttpServer`] owns sockets and connections and keeps the address table
//! - [`Listener`] is the logical server for one address: routes, stages, drain
//! - [`Handler`] gets the request plus a [`ResponseSession`] to answer through
//! - [`TransferQueue`] feeds incremental response bodies without blocking the writer

mod date;
mod dispatcher;
mod error;
mod handler;
mod http_server;
mod listener;
mod route;
mod session;
mod stage;
mod transfer_queue;

pub use error::ServerError;
pub use handler::{Handler, HandlerContext, HandlerFn, make_handler};
pub use http_server::HttpServer;
pub use listener::Listener;
pub use route::{PathParams, RegistrationHandle, RouteOptions};
pub use session::{ResponseSession, ResponseSink, ResponseState, WriteOutcome};
pub use stage::{FnStage, Stage, StageOutcome, stage_fn};
pub use transfer_queue::{TransferDestination, TransferFuture, TransferQueue};

pub(crate) use date::DateCache;
pub(crate) use http_server::ServerShared;
pub(crate) use session::{Command, SessionDriver};
