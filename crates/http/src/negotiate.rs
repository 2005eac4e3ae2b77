//! Transfer negotiation for outgoing messages.
//!
//! [`negotiate`] decides how a body is framed and rewrites the framing
//! headers to match, so a message never leaves with both `Content-Length` and
//! `Transfer-Encoding`. The rules, first match wins:
//!
//! 1. a body that must not exist (HEAD responses, 1xx, 204, 205, 304) gets no framing
//! 2. framing headers set by the caller are kept as they are
//! 3. a known length becomes `Content-Length`
//! 4. an unknown length is chunked on HTTP/1.1 and close-delimited on HTTP/1.0

use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Version};
use http_body::SizeHint;
use tracing::warn;

use crate::protocol::{PayloadSize, SendError, is_body_forbidden};

const CHUNKED: HeaderValue = HeaderValue::from_static("chunked");

/// What the message kind allows for its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPolicy {
    /// Responses and body-carrying requests: the length is always declared, even when zero.
    Declared,
    /// Requests whose method normally has no body: an empty body gets no header at all.
    Optional,
    /// 1xx, 204 and 205: never a body, never a framing header.
    Forbidden,
    /// HEAD responses and 304: never a body, but a caller-set `Content-Length` may describe the full resource.
    HeadersOnly,
}

impl BodyPolicy {
    pub fn for_response(request_method: &Method, status: StatusCode) -> Self {
        if !is_body_forbidden(request_method, status) {
            return BodyPolicy::Declared;
        }
        if request_method == Method::HEAD || status == StatusCode::NOT_MODIFIED {
            BodyPolicy::HeadersOnly
        } else {
            BodyPolicy::Forbidden
        }
    }

    pub fn for_request(method: &Method) -> Self {
        if matches!(*method, Method::GET | Method::HEAD | Method::DELETE | Method::OPTIONS | Method::CONNECT | Method::TRACE) {
            BodyPolicy::Optional
        } else {
            BodyPolicy::Declared
        }
    }

    pub fn allows_body(self) -> bool {
        matches!(self, BodyPolicy::Declared | BodyPolicy::Optional)
    }
}

/// Picks the body framing and fixes up the framing headers in `headers`.
///
/// `size_hint` describes the entity that is about to be written; an exact hint
/// means the length is known.
pub fn negotiate(headers: &mut HeaderMap, version: Version, size_hint: &SizeHint, policy: BodyPolicy) -> Result<PayloadSize, SendError> {
    match policy {
        BodyPolicy::Forbidden => {
            headers.remove(CONTENT_LENGTH);
            headers.remove(TRANSFER_ENCODING);
            return Ok(PayloadSize::Empty);
        }
        BodyPolicy::HeadersOnly => {
            headers.remove(TRANSFER_ENCODING);
            return Ok(PayloadSize::Empty);
        }
        BodyPolicy::Declared | BodyPolicy::Optional => {}
    }

    if let Some(payload_size) = explicit_framing(headers, version)? {
        return Ok(payload_size);
    }

    match size_hint.exact() {
        Some(0) if policy == BodyPolicy::Optional => Ok(PayloadSize::Empty),
        Some(length) => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            Ok(PayloadSize::new_length(length))
        }
        None if version == Version::HTTP_10 => Ok(PayloadSize::UntilClose),
        None => {
            headers.insert(TRANSFER_ENCODING, CHUNKED);
            Ok(PayloadSize::Chunked)
        }
    }
}

/// Honors framing headers the caller already set.
///
/// When both are present `Transfer-Encoding` wins and `Content-Length` is
/// dropped. A transfer coding that doesn't end in `chunked` can only be
/// delimited by closing the connection.
fn explicit_framing(headers: &mut HeaderMap, version: Version) -> Result<Option<PayloadSize>, SendError> {
    if let Some(te) = headers.get(TRANSFER_ENCODING) {
        let chunked = is_chunked(te);
        if headers.remove(CONTENT_LENGTH).is_some() {
            warn!("both transfer-encoding and content-length were set, dropping content-length");
        }
        return Ok(Some(if chunked && version != Version::HTTP_10 {
            PayloadSize::Chunked
        } else {
            if chunked {
                // HTTP/1.0 peers don't understand chunked
                headers.remove(TRANSFER_ENCODING);
            }
            PayloadSize::UntilClose
        }));
    }

    match headers.get(CONTENT_LENGTH) {
        Some(value) => {
            let length = value
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .ok_or_else(|| SendError::invalid_body(format!("invalid content-length header: {value:?}")))?;
            Ok(Some(PayloadSize::new_length(length)))
        }
        None => Ok(None),
    }
}

/// Whether `chunked` is the final transfer coding.
pub(crate) fn is_chunked(value: &HeaderValue) -> bool {
    value.as_bytes().rsplit(|b| *b == b',').next().is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(n: u64) -> SizeHint {
        SizeHint::with_exact(n)
    }

    fn assert_exclusive(headers: &HeaderMap) {
        assert!(!(headers.contains_key(CONTENT_LENGTH) && headers.contains_key(TRANSFER_ENCODING)));
    }

    #[test]
    fn known_length_sets_content_length() {
        let mut headers = HeaderMap::new();
        let size = negotiate(&mut headers, Version::HTTP_11, &exact(11), BodyPolicy::Declared).unwrap();
        assert_eq!(size, PayloadSize::Length(11));
        assert_eq!(headers[CONTENT_LENGTH], "11");
        assert_exclusive(&headers);
    }

    #[test]
    fn unknown_length_chunked_on_http11() {
        let mut headers = HeaderMap::new();
        let size = negotiate(&mut headers, Version::HTTP_11, &SizeHint::new(), BodyPolicy::Declared).unwrap();
        assert_eq!(size, PayloadSize::Chunked);
        assert_eq!(headers[TRANSFER_ENCODING], "chunked");
        assert_exclusive(&headers);
    }

    #[test]
    fn unknown_length_until_close_on_http10() {
        let mut headers = HeaderMap::new();
        let size = negotiate(&mut headers, Version::HTTP_10, &SizeHint::new(), BodyPolicy::Declared).unwrap();
        assert_eq!(size, PayloadSize::UntilClose);
        assert!(headers.is_empty());
    }

    #[test]
    fn no_content_discards_everything() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(5u64));
        let policy = BodyPolicy::for_response(&Method::GET, StatusCode::NO_CONTENT);
        assert_eq!(policy, BodyPolicy::Forbidden);
        let size = negotiate(&mut headers, Version::HTTP_11, &exact(5), policy).unwrap();
        assert_eq!(size, PayloadSize::Empty);
        assert!(!headers.contains_key(CONTENT_LENGTH));
        assert!(!headers.contains_key(TRANSFER_ENCODING));
    }

    #[test]
    fn head_response_keeps_explicit_length() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(42u64));
        headers.insert(TRANSFER_ENCODING, CHUNKED);
        let policy = BodyPolicy::for_response(&Method::HEAD, StatusCode::OK);
        let size = negotiate(&mut headers, Version::HTTP_11, &exact(42), policy).unwrap();
        assert_eq!(size, PayloadSize::Empty);
        assert_eq!(headers[CONTENT_LENGTH], "42");
        assert_exclusive(&headers);
    }

    #[test]
    fn explicit_headers_are_respected() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(3u64));
        let size = negotiate(&mut headers, Version::HTTP_11, &SizeHint::new(), BodyPolicy::Declared).unwrap();
        assert_eq!(size, PayloadSize::Length(3));
        assert!(!headers.contains_key(TRANSFER_ENCODING));

        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, CHUNKED);
        let size = negotiate(&mut headers, Version::HTTP_11, &exact(3), BodyPolicy::Declared).unwrap();
        assert_eq!(size, PayloadSize::Chunked);
        assert!(!headers.contains_key(CONTENT_LENGTH));
    }

    #[test]
    fn transfer_encoding_wins_over_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(3u64));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("gzip, chunked"));
        let size = negotiate(&mut headers, Version::HTTP_11, &exact(3), BodyPolicy::Declared).unwrap();
        assert_eq!(size, PayloadSize::Chunked);
        assert_exclusive(&headers);
    }

    #[test]
    fn invalid_explicit_length_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("ten"));
        assert!(negotiate(&mut headers, Version::HTTP_11, &exact(10), BodyPolicy::Declared).is_err());
    }

    #[test]
    fn bodiless_get_has_no_length_header() {
        let mut headers = HeaderMap::new();
        let policy = BodyPolicy::for_request(&Method::GET);
        let size = negotiate(&mut headers, Version::HTTP_11, &exact(0), policy).unwrap();
        assert_eq!(size, PayloadSize::Empty);
        assert!(headers.is_empty());

        let mut headers = HeaderMap::new();
        let policy = BodyPolicy::for_request(&Method::POST);
        negotiate(&mut headers, Version::HTTP_11, &exact(0), policy).unwrap();
        assert_eq!(headers[CONTENT_LENGTH], "0");
    }

    #[test]
    fn check_is_chunked() {
        assert!(is_chunked(&HeaderValue::from_static("gzip, chunked")));
        assert!(is_chunked(&HeaderValue::from_static("Chunked")));
        assert!(!is_chunked(&HeaderValue::from_static("chunked, gzip")));
        assert!(!is_chunked(&HeaderValue::from_static("gzip")));
    }
}
