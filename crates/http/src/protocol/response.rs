//! HTTP response header handling implementation.
//!
//! This module provides type definitions for HTTP response headers.
//! It uses the standard `http::Response` type with an empty body placeholder
//! to represent response headers before the actual response body is attached.

use http::{Method, Response, StatusCode};

/// Type alias for HTTP response headers.
///
/// This type represents the header portion of an HTTP response, using
/// `http::Response<()>` with an empty body placeholder. The server writes it
/// before the body, the client decodes it before the body arrives.
pub type ResponseHead = Response<()>;

/// Whether a response to `method` with `status` must not carry a body.
///
/// Covers HEAD responses and the 1xx, 204, 205 and 304 statuses.
pub fn is_body_forbidden(method: &Method, status: StatusCode) -> bool {
    method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::RESET_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_statuses() {
        assert!(is_body_forbidden(&Method::GET, StatusCode::NO_CONTENT));
        assert!(is_body_forbidden(&Method::GET, StatusCode::RESET_CONTENT));
        assert!(is_body_forbidden(&Method::GET, StatusCode::NOT_MODIFIED));
        assert!(is_body_forbidden(&Method::HEAD, StatusCode::OK));
        assert!(!is_body_forbidden(&Method::GET, StatusCode::OK));
    }
}
