//! Streaming HTTP/1.x codecs for `tokio_util::codec`.
//!
//! A message travels as a [`Message::Header`](crate::protocol::Message) item
//! followed by [`Message::Payload`](crate::protocol::Message) items, the last
//! of which is always `PayloadItem::Eof`.
//!
//! | side   | decode            | encode            |
//! |--------|-------------------|-------------------|
//! | server | [`RequestDecoder`]  | [`ResponseEncoder`] |
//! | client | [`ResponseDecoder`] | [`RequestEncoder`]  |
//!
//! Heads are handled by the [`header`] codecs, bodies by the [`body`] codecs.

pub mod body;
pub mod header;
mod request_decoder;
mod request_encoder;
mod response_decoder;
mod response_encoder;

pub use header::HeaderLimits;
pub use request_decoder::RequestDecoder;
pub use request_encoder::RequestEncoder;
pub use response_decoder::ResponseDecoder;
pub use response_encoder::ResponseEncoder;
