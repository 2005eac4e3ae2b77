use std::io;
use std::net::SocketAddr;

use http::{Method, StatusCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no listener registered for {addr}")]
    NoListenerForAddress { addr: SocketAddr },

    #[error("no handler registered for path {path}")]
    NoHandlerForPath { path: String },

    /// The request path does not percent-decode to UTF-8.
    #[error("malformed request path {path}: {reason}")]
    MalformedPath { path: String, reason: String },

    #[error("method {method} not allowed for this path")]
    MethodNotAllowed { method: Method, allowed: Vec<Method> },

    #[error("the response of this session was already initiated")]
    ResponseAlreadyInitiated,

    #[error("a listener is already registered for {addr}")]
    DuplicateBind { addr: SocketAddr },

    #[error("invalid route '{path}': {reason}")]
    InvalidRoute { path: String, reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ServerError {
    /// Status sent to the peer when dispatch fails with this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::NoListenerForAddress { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::MalformedPath { .. } => StatusCode::BAD_REQUEST,
            ServerError::NoHandlerForPath { .. } => StatusCode::NOT_FOUND,
            ServerError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
