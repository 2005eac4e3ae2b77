use std::io;
use std::time::Duration;

use http::Response;
use thiserror::Error;

use crate::protocol::{HttpEntity, ParseError, SendError};

#[derive(Debug, Error)]
pub enum ClientError {
    /// The local concurrency limit had no free slot within the request timeout.
    #[error("request rejected by admission control after waiting {waited:?}")]
    AdmissionRejected { waited: Duration },

    /// The peer didn't answer within the request timeout.
    #[error("no response within {timeout:?}")]
    ResponseTimeout { timeout: Duration },

    /// Carries the last redirect response.
    #[error("more than {max_redirects} redirects")]
    MaxRedirectsExceeded { max_redirects: usize, response: Box<Response<HttpEntity>> },

    #[error("remote closed the connection before the response was complete")]
    RemoteConnectionClosed,

    #[error("malformed uri: {reason}")]
    MalformedUri { reason: String },

    #[error("can't decode {encoding} response body: {source}")]
    Decoding { encoding: &'static str, source: io::Error },

    /// A redirect or retry needs the request body again, but it can only be read once.
    #[error("request body can't be replayed")]
    BodyNotReplayable,

    #[error("client is stopped")]
    Stopped,

    #[error("parse error: {source}")]
    Parse {
        #[from]
        source: ParseError,
    },

    #[error("send error: {source}")]
    Send {
        #[from]
        source: SendError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ClientError {
    pub fn malformed_uri<S: ToString>(reason: S) -> Self {
        Self::MalformedUri { reason: reason.to_string() }
    }

    /// Whether the connection broke before a response arrived, so a fresh connection may succeed.
    pub(crate) fn is_stale_connection(&self) -> bool {
        match self {
            ClientError::RemoteConnectionClosed => true,
            ClientError::Send { source } => source.is_remote_closed(),
            ClientError::Io { source } | ClientError::Parse { source: ParseError::Io { source } } => crate::protocol::is_remote_closed(source),
            _ => false,
        }
    }
}
