//! Protocol types shared by the client and the server.
//!
//! - [`message`]: `Message`, `PayloadItem` and `PayloadSize`, the unit exchanged with the codecs
//! - [`request`] / [`response`]: header wrappers around the `http` crate types
//! - [`entity`]: the body model (`HttpEntity`) for outgoing messages
//! - [`pipe`]: a bounded byte pipe used for deferred bodies
//! - [`body`]: the inbound request body handed to server handlers
//! - [`error`]: `HttpError`, `ParseError`, `SendError`

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::ResponseHead;
pub use response::is_body_forbidden;

mod error;
pub(crate) use error::is_remote_closed;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
pub mod entity;
pub mod pipe;

pub use entity::HttpEntity;
