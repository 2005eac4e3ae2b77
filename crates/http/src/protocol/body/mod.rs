//! Request body streaming for the server side.
//!
//! The connection loop owns the decoded payload stream; the handler owns a
//! [`ReqBody`]. The two sides talk over a pair of channels:
//!
//! - the handler asks for data by polling [`ReqBody`], which sends a signal
//! - the connection reads one payload item and sends it back
//!
//! Nothing is read from the socket unless the handler asks for it, or drops
//! its [`ReqBody`]. Whatever the handler leaves unread is drained by the
//! connection, at the latest after the response completes, so the connection
//! stays positioned at the next request. From that point on the body refuses
//! further reads. Once the body is read the connection keeps watching the
//! socket, which is how a peer hanging up during a long response is noticed.

mod body_channel;

pub use body_channel::ReqBody;
pub(crate) use body_channel::{BodyServed, ReqBodySender, create_body_sender_receiver};
