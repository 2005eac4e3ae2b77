use std::fmt;
use std::io;

use async_trait::async_trait;
use http::Uri;
use http::uri::Scheme;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::client::ClientError;

/// A byte stream to a peer; TLS connectors return their encrypted stream here.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

pub type BoxedTransport = Box<dyn Transport>;

/// Where a connection goes: scheme, host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self { scheme, host: host.into(), port }
    }

    /// The endpoint of an absolute request URI; the port defaults from the scheme.
    pub fn from_uri(uri: &Uri) -> Result<Self, ClientError> {
        let scheme = uri.scheme().cloned().ok_or_else(|| ClientError::malformed_uri(format!("{uri} has no scheme")))?;
        let host = uri.host().filter(|host| !host.is_empty()).ok_or_else(|| ClientError::malformed_uri(format!("{uri} has no host")))?;
        let port = match uri.port_u16() {
            Some(port) => port,
            None if scheme == Scheme::HTTP => 80,
            None if scheme == Scheme::HTTPS => 443,
            None => return Err(ClientError::malformed_uri(format!("unsupported scheme {scheme}"))),
        };
        Ok(Self { scheme, host: host.trim_start_matches('[').trim_end_matches(']').to_owned(), port })
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

/// Opens transports to endpoints.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<BoxedTransport>;
}

/// Plain TCP; `https` needs a TLS capable connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<BoxedTransport> {
        if endpoint.scheme() != &Scheme::HTTP {
            return Err(io::Error::new(io::ErrorKind::Unsupported, format!("{} needs a tls connector", endpoint.scheme())));
        }
        let stream = TcpStream::connect((endpoint.host(), endpoint.port())).await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(cause = %e, "can't set nodelay");
        }
        debug!(%endpoint, "connected");
        Ok(Box::new(stream))
    }
}
