use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::config::{ListenerConfig, ServerConfig};
use crate::connection::HttpConnection;
use crate::protocol::HttpError;
use crate::server::date::DateCache;
use crate::server::dispatcher::Dispatcher;
use crate::server::transfer_queue::TransferQueue;
use crate::server::{Listener, ServerError};

/// State shared by the server handle, its listeners and every connection.
pub(crate) struct ServerShared {
    pub(crate) config: ServerConfig,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) queue: TransferQueue,
    pub(crate) date: DateCache,
    /// `true` while stopped; idle connections close when it flips.
    pub(crate) shutdown: watch::Sender<bool>,
    started: AtomicBool,
}

/// The physical side of the server: sockets, connections and the listener table.
///
/// One server can host many listeners. Each inbound request is dispatched to
/// the listener owning the local address its connection was accepted on.
pub struct HttpServer {
    shared: Arc<ServerShared>,
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("config", &self.shared.config)
            .field("listeners", &self.shared.dispatcher.listeners())
            .field("started", &self.shared.started.load(Ordering::Acquire))
            .finish()
    }
}

impl Default for HttpServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl HttpServer {
    pub fn new(config: ServerConfig) -> Self {
        let shared = ServerShared {
            config,
            dispatcher: Dispatcher::default(),
            queue: TransferQueue::new(),
            date: DateCache::new(),
            shutdown: watch::Sender::new(false),
            started: AtomicBool::new(false),
        };
        Self { shared: Arc::new(shared) }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Binds `addr` and registers a listener for the address actually bound.
    ///
    /// Binding port `0` picks a free port; see [`Listener::local_addr`].
    /// The listener accepts right away if the server is started.
    pub async fn add_listener(&self, addr: SocketAddr, config: ListenerConfig) -> Result<Arc<Listener>, ServerError> {
        let socket = TcpListener::bind(addr).await?;
        let local_addr = socket.local_addr()?;

        let listener = Arc::new(Listener::new(local_addr, config, &self.shared, Some(socket)));
        self.shared.dispatcher.register(Arc::clone(&listener))?;

        if self.shared.started.load(Ordering::Acquire) {
            listener.start()?;
        }
        Ok(listener)
    }

    /// Registers a listener for an address whose connections arrive through
    /// [`serve_connection`](Self::serve_connection) or another listener's socket.
    pub fn add_logical_listener(&self, addr: SocketAddr, config: ListenerConfig) -> Result<Arc<Listener>, ServerError> {
        let listener = Arc::new(Listener::new(addr, config, &self.shared, None));
        self.shared.dispatcher.register(Arc::clone(&listener))?;
        Ok(listener)
    }

    pub fn listener(&self, addr: SocketAddr) -> Option<Arc<Listener>> {
        self.shared.dispatcher.resolve(addr)
    }

    pub fn listeners(&self) -> Vec<Arc<Listener>> {
        self.shared.dispatcher.listeners()
    }

    pub fn start(&self) -> Result<(), ServerError> {
        self.shared.started.store(true, Ordering::Release);
        self.shared.shutdown.send_replace(false);
        for listener in self.shared.dispatcher.listeners() {
            listener.start()?;
        }
        info!("server started");
        Ok(())
    }

    /// Stops accepting and closes idle connections.
    ///
    /// Requests already in flight complete; use [`Listener::dispose`] to wait for them.
    pub fn stop(&self) {
        self.shared.started.store(false, Ordering::Release);
        self.shared.shutdown.send_replace(true);
        for listener in self.shared.dispatcher.listeners() {
            listener.stop();
        }
        info!("server stopped");
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    /// Serves one already established connection until it closes.
    ///
    /// Requests are dispatched by `local_addr`, so this is how logical
    /// listeners receive traffic from transports the server doesn't own.
    pub async fn serve_connection<R, W>(&self, reader: R, writer: W, local_addr: SocketAddr, remote_addr: SocketAddr) -> Result<(), HttpError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        HttpConnection::new(reader, writer, Arc::clone(&self.shared), local_addr, remote_addr).process().await
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        if self.shared.started.load(Ordering::Acquire) {
            self.stop();
        }
    }
}
