//! Redirect following.
//!
//! A logical request runs as a sequence of attempts. After each redirect
//! response [`RedirectState::follow`] rewrites the request for the next
//! attempt or reports that the bound was exceeded; with a bound of `M` the
//! peer sees at most `M + 1` attempts.

use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST, LOCATION, TRANSFER_ENCODING};
use http::request::Parts;
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{HeaderMap, Method, StatusCode, Uri};
use tracing::debug;

use crate::client::ClientError;
use crate::client::cookie::{CookieSet, apply_cookies};
use crate::config::RedirectPolicy;
use crate::protocol::HttpEntity;

/// Whether the client should follow `status` given the response `headers`.
pub fn is_redirect(status: StatusCode, headers: &HeaderMap) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) && headers.contains_key(LOCATION)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectStep {
    /// The request was rewritten for the next attempt.
    Follow,
    /// The redirect bound was reached; the response is final.
    Exceeded,
}

/// Per logical request state carried across attempts.
#[derive(Debug, Default)]
pub struct RedirectState {
    redirects: usize,
    cookies: CookieSet,
}

impl RedirectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redirects followed so far.
    pub fn redirects(&self) -> usize {
        self.redirects
    }

    pub fn cookies(&self) -> &CookieSet {
        &self.cookies
    }

    /// Rewrites `parts` and `entity` to follow a redirect response.
    pub fn follow(
        &mut self,
        parts: &mut Parts,
        entity: &mut HttpEntity,
        status: StatusCode,
        response_headers: &HeaderMap,
        policy: RedirectPolicy,
        max_redirects: usize,
    ) -> Result<RedirectStep, ClientError> {
        self.cookies.absorb_set_cookies(response_headers);

        if self.redirects >= max_redirects {
            return Ok(RedirectStep::Exceeded);
        }
        self.redirects += 1;

        let location = response_headers.get(LOCATION).and_then(|value| value.to_str().ok()).ok_or_else(|| ClientError::malformed_uri("redirect without a usable location"))?;
        let target = resolve(&parts.uri, location)?;

        let drop_body = match status {
            StatusCode::SEE_OTHER => true,
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => policy == RedirectPolicy::Compatible && parts.method == Method::POST,
            _ => false,
        };

        if drop_body {
            if parts.method != Method::HEAD {
                parts.method = Method::GET;
            }
            *entity = HttpEntity::empty();
            parts.headers.remove(CONTENT_LENGTH);
            parts.headers.remove(TRANSFER_ENCODING);
            parts.headers.remove(CONTENT_TYPE);
        } else if !entity.is_empty() {
            if !entity.is_replayable() {
                return Err(ClientError::BodyNotReplayable);
            }
            entity.reset()?;
        }

        if target.authority() != parts.uri.authority() {
            parts.headers.remove(AUTHORIZATION);
        }
        parts.headers.remove(HOST);
        apply_cookies(&mut parts.headers, &self.cookies);

        debug!(%status, from = %parts.uri, to = %target, method = %parts.method, "following redirect");
        parts.uri = target;
        Ok(RedirectStep::Follow)
    }
}

/// Resolves a `Location` value against the URI of the request it answers.
fn resolve(base: &Uri, location: &str) -> Result<Uri, ClientError> {
    let location = location.trim();
    if location.contains("://") {
        return location.parse().map_err(ClientError::malformed_uri);
    }

    let scheme = base.scheme().cloned().unwrap_or(Scheme::HTTP);
    if let Some(rest) = location.strip_prefix("//") {
        return format!("{scheme}://{rest}").parse().map_err(ClientError::malformed_uri);
    }

    let authority: &Authority = base.authority().ok_or_else(|| ClientError::malformed_uri("request uri has no authority"))?;
    let path_and_query = if location.starts_with('/') {
        location.to_owned()
    } else {
        let base_path = base.path();
        let dir = base_path.rfind('/').map_or("/", |i| &base_path[..=i]);
        format!("{dir}{location}")
    };
    let path_and_query: PathAndQuery = path_and_query.parse().map_err(ClientError::malformed_uri)?;

    Uri::builder().scheme(scheme).authority(authority.clone()).path_and_query(path_and_query).build().map_err(ClientError::malformed_uri)
}
