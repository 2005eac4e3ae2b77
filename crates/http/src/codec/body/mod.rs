//! Body framing codecs.
//!
//! [`PayloadDecoder`] and [`PayloadEncoder`] pick the concrete codec from a
//! [`PayloadSize`](crate::protocol::PayloadSize): `Content-Length`, chunked,
//! close-delimited or no body at all.

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
