//! Connection handling.
//!
//! - [`HttpConnection`]: the server side loop, one request at a time, handlers on their own tasks
//! - [`ClientConnection`]: one client side connection, one exchange at a time
//!
//! Both sides read through a `FramedRead` with a message decoder and write
//! through a `FramedWrite` with the matching encoder.

mod client_connection;
mod http_connection;
mod response_writer;

pub use client_connection::ClientConnection;
pub(crate) use http_connection::HttpConnection;
