//! Proxy selection and authentication collaborators.
//!
//! The client asks a [`ProxySelector`] where each request goes and lets an
//! [`Authenticator`] decorate it and answer one `401` challenge per attempt.
//! Challenge protocols themselves live in the host's implementations.

use http::header::AUTHORIZATION;
use http::{HeaderValue, Request, StatusCode, Uri};

use crate::client::Endpoint;
use crate::protocol::ResponseHead;

#[cfg_attr(test, mockall::automock)]
pub trait ProxySelector: Send + Sync {
    /// The proxy to send `uri` through, or `None` to connect directly.
    fn select(&self, uri: &Uri) -> Option<Endpoint>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProxy;

impl ProxySelector for NoProxy {
    fn select(&self, _uri: &Uri) -> Option<Endpoint> {
        None
    }
}

/// Sends everything through one proxy except hosts matching a bypass suffix.
#[derive(Debug, Clone)]
pub struct FixedProxy {
    proxy: Endpoint,
    bypass: Vec<String>,
}

impl FixedProxy {
    pub fn new(proxy: Endpoint) -> Self {
        Self { proxy, bypass: Vec::new() }
    }

    pub fn bypass(mut self, host_suffix: impl Into<String>) -> Self {
        self.bypass.push(host_suffix.into());
        self
    }
}

impl ProxySelector for FixedProxy {
    fn select(&self, uri: &Uri) -> Option<Endpoint> {
        let host = uri.host().unwrap_or_default();
        if self.bypass.iter().any(|suffix| host.ends_with(suffix.as_str())) {
            return None;
        }
        Some(self.proxy.clone())
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Authenticator: Send + Sync {
    /// Adds credentials before the request is sent.
    fn decorate(&self, request: &mut Request<()>);

    /// Returns the `Authorization` value answering a `401`, or `None` to give up.
    fn on_challenge(&self, request: &Request<()>, response: &ResponseHead) -> Option<HeaderValue>;
}

/// Answers a `401` with a fixed, preformatted `Authorization` value.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    authorization: HeaderValue,
    preemptive: bool,
}

impl StaticCredentials {
    pub fn new(authorization: HeaderValue) -> Self {
        Self { authorization, preemptive: false }
    }

    /// Sends the credentials with the first attempt instead of waiting for a challenge.
    pub fn preemptive(mut self) -> Self {
        self.preemptive = true;
        self
    }
}

impl Authenticator for StaticCredentials {
    fn decorate(&self, request: &mut Request<()>) {
        if self.preemptive && !request.headers().contains_key(AUTHORIZATION) {
            request.headers_mut().insert(AUTHORIZATION, self.authorization.clone());
        }
    }

    fn on_challenge(&self, request: &Request<()>, response: &ResponseHead) -> Option<HeaderValue> {
        // the same credentials were already refused
        if response.status() != StatusCode::UNAUTHORIZED || request.headers().get(AUTHORIZATION) == Some(&self.authorization) {
            return None;
        }
        Some(self.authorization.clone())
    }
}
