use std::time::Duration;

use crate::config::{ClientConfig, RedirectPolicy};

/// Per request overrides of the client configuration.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    timeout: Option<Duration>,
    follow_redirects: Option<bool>,
    max_redirects: Option<usize>,
    redirect_policy: Option<RedirectPolicy>,
    decompress: Option<bool>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds both the admission wait and the wait for each response head.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = Some(follow);
        self
    }

    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = Some(max_redirects);
        self
    }

    pub fn redirect_policy(mut self, policy: RedirectPolicy) -> Self {
        self.redirect_policy = Some(policy);
        self
    }

    pub fn decompress(mut self, decompress: bool) -> Self {
        self.decompress = Some(decompress);
        self
    }

    pub(crate) fn resolve(&self, config: &ClientConfig) -> ResolvedOptions {
        ResolvedOptions {
            timeout: self.timeout.unwrap_or_else(|| config.request_timeout()),
            follow_redirects: self.follow_redirects.unwrap_or_else(|| config.follow_redirects()),
            max_redirects: self.max_redirects.unwrap_or_else(|| config.max_redirects()),
            redirect_policy: self.redirect_policy.unwrap_or_else(|| config.redirect_policy()),
            decompress: self.decompress.unwrap_or_else(|| config.decompress()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedOptions {
    pub(crate) timeout: Duration,
    pub(crate) follow_redirects: bool,
    pub(crate) max_redirects: usize,
    pub(crate) redirect_policy: RedirectPolicy,
    pub(crate) decompress: bool,
}
