//! Per-instance configuration.
//!
//! Every client, server and listener is built from its own immutable config
//! value; there is no process-wide mutable default. Configs are created with
//! `Default` and adjusted through the `with_*` builder methods.

use std::sync::Arc;
use std::time::Duration;

use crate::codec::HeaderLimits;
use crate::protocol::pipe::DEFAULT_PIPE_CAPACITY;
use crate::server::Stage;

/// How the client rewrites a request when following 301 and 302.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectPolicy {
    /// A `POST` answered with 301 or 302 is re-sent as a bodiless `GET`, like browsers do.
    #[default]
    Compatible,
    /// 301 and 302 keep the method and the body.
    Strict,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    max_connections: usize,
    connection_idle_timeout: Duration,
    use_persistent_connections: bool,
    streaming_enabled: bool,
    response_buffer_size: usize,
    max_redirects: usize,
    follow_redirects: bool,
    redirect_policy: RedirectPolicy,
    decompress: bool,
    request_timeout: Duration,
    connect_timeout: Duration,
    header_limits: HeaderLimits,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_connections: 0,
            connection_idle_timeout: Duration::from_secs(60),
            use_persistent_connections: true,
            streaming_enabled: false,
            response_buffer_size: DEFAULT_PIPE_CAPACITY,
            max_redirects: 5,
            follow_redirects: true,
            redirect_policy: RedirectPolicy::Compatible,
            decompress: true,
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            header_limits: HeaderLimits::default(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of concurrently in-flight requests; `0` means unbounded.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_connection_idle_timeout(mut self, timeout: Duration) -> Self {
        self.connection_idle_timeout = timeout;
        self
    }

    pub fn with_persistent_connections(mut self, enabled: bool) -> Self {
        self.use_persistent_connections = enabled;
        self
    }

    /// Makes [`HttpClient::send_async`](crate::client::HttpClient::send_async) use deferred streaming.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming_enabled = enabled;
        self
    }

    /// Bound of the pipe backing a deferred response body.
    pub fn with_response_buffer_size(mut self, size: usize) -> Self {
        self.response_buffer_size = size.max(1);
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Default for requests whose options don't say otherwise.
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn with_redirect_policy(mut self, policy: RedirectPolicy) -> Self {
        self.redirect_policy = policy;
        self
    }

    pub fn with_decompress(mut self, decompress: bool) -> Self {
        self.decompress = decompress;
        self
    }

    /// Default response timeout, used when a request carries none.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_header_limits(mut self, limits: HeaderLimits) -> Self {
        self.header_limits = limits;
        self
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn connection_idle_timeout(&self) -> Duration {
        self.connection_idle_timeout
    }

    pub fn use_persistent_connections(&self) -> bool {
        self.use_persistent_connections
    }

    pub fn streaming_enabled(&self) -> bool {
        self.streaming_enabled
    }

    pub fn response_buffer_size(&self) -> usize {
        self.response_buffer_size
    }

    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    pub fn redirect_policy(&self) -> RedirectPolicy {
        self.redirect_policy
    }

    pub fn decompress(&self) -> bool {
        self.decompress
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn header_limits(&self) -> HeaderLimits {
        self.header_limits
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    use_persistent_connections: bool,
    write_buffer_size: usize,
    read_buffer_size: usize,
    header_limits: HeaderLimits,
    dispose_timeout: Duration,
    body_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            use_persistent_connections: true,
            write_buffer_size: 64 * 1024,
            read_buffer_size: 8 * 1024,
            header_limits: HeaderLimits::default(),
            dispose_timeout: Duration::from_secs(5),
            body_channel_capacity: 16 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persistent_connections(mut self, enabled: bool) -> Self {
        self.use_persistent_connections = enabled;
        self
    }

    /// Upper bound for a single streamed chunk and the write buffer of a connection.
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size.max(1);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn with_header_limits(mut self, limits: HeaderLimits) -> Self {
        self.header_limits = limits;
        self
    }

    /// Default drain bound for listeners that don't override it.
    pub fn with_dispose_timeout(mut self, timeout: Duration) -> Self {
        self.dispose_timeout = timeout;
        self
    }

    /// Bound of the pipe behind an incremental response sink.
    pub fn with_body_channel_capacity(mut self, capacity: usize) -> Self {
        self.body_channel_capacity = capacity.max(1);
        self
    }

    pub fn use_persistent_connections(&self) -> bool {
        self.use_persistent_connections
    }

    pub fn write_buffer_size(&self) -> usize {
        self.write_buffer_size
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub fn header_limits(&self) -> HeaderLimits {
        self.header_limits
    }

    pub fn dispose_timeout(&self) -> Duration {
        self.dispose_timeout
    }

    pub fn body_channel_capacity(&self) -> usize {
        self.body_channel_capacity
    }
}

/// Settings of one logical listener.
#[derive(Debug, Clone, Default)]
pub struct ListenerConfig {
    dispose_timeout: Option<Duration>,
    stages: Vec<Arc<dyn Stage>>,
}

impl ListenerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dispose_timeout(mut self, timeout: Duration) -> Self {
        self.dispose_timeout = Some(timeout);
        self
    }

    /// Appends a stage; stages run in the order they were added.
    pub fn with_stage<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn dispose_timeout(&self) -> Option<Duration> {
        self.dispose_timeout
    }

    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }
}
