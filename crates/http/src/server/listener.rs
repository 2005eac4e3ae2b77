//! Logical listeners.
//!
//! A [`Listener`] owns the routes, stages and in-flight request count of one
//! local address. Physical listeners also own a bound socket and an accept
//! task; logical ones are reached through connections the host hands to
//! [`HttpServer::serve_connection`](crate::server::HttpServer::serve_connection).

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::config::ListenerConfig;
use crate::connection::HttpConnection;
use crate::server::http_server::ServerShared;
use crate::server::route::{RouteMatch, RouteRegistry};
use crate::server::{Handler, RegistrationHandle, RouteOptions, ServerError, Stage};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct Listener {
    addr: SocketAddr,
    stages: Vec<Arc<dyn Stage>>,
    dispose_timeout: Duration,
    routes: Arc<RouteRegistry>,
    active: Arc<AtomicUsize>,
    socket: Mutex<Option<Arc<TcpListener>>>,
    physical: bool,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    server: Weak<ServerShared>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("addr", &self.addr)
            .field("physical", &self.physical)
            .field("running", &self.is_running())
            .field("active_requests", &self.active_requests())
            .finish_non_exhaustive()
    }
}

impl Listener {
    pub(crate) fn new(addr: SocketAddr, config: ListenerConfig, server: &Arc<ServerShared>, socket: Option<TcpListener>) -> Self {
        let dispose_timeout = config.dispose_timeout().unwrap_or_else(|| server.config.dispose_timeout());
        Self {
            addr,
            stages: config.stages().to_vec(),
            dispose_timeout,
            routes: Arc::new(RouteRegistry::new(addr)),
            active: Arc::new(AtomicUsize::new(0)),
            physical: socket.is_some(),
            socket: Mutex::new(socket.map(Arc::new)),
            accept_task: Mutex::new(None),
            server: Arc::downgrade(server),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Registers `handler` for every method on `path`.
    pub fn add_request_handler<H: Handler + 'static>(&self, path: &str, handler: H) -> Result<RegistrationHandle, ServerError> {
        self.add_route(path, RouteOptions::default(), handler)
    }

    pub fn add_route<H: Handler + 'static>(&self, path: &str, options: RouteOptions, handler: H) -> Result<RegistrationHandle, ServerError> {
        self.routes.add(path, options, Arc::new(handler))
    }

    /// Starts accepting connections. Does nothing when already running or for a logical listener.
    pub fn start(&self) -> Result<(), ServerError> {
        let mut accept_task = self.accept_task.lock().unwrap_or_else(PoisonError::into_inner);
        if accept_task.as_ref().is_some_and(|task| !task.is_finished()) || !self.physical {
            return Ok(());
        }

        let socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(socket) = socket else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, format!("listener {} was disposed", self.addr)).into());
        };

        info!(addr = %self.addr, "start listening");
        *accept_task = Some(tokio::spawn(accept_loop(socket, self.addr, Weak::clone(&self.server))));
        Ok(())
    }

    /// Stops accepting new connections; established connections keep being served.
    pub fn stop(&self) {
        if let Some(task) = self.accept_task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
            info!(addr = %self.addr, "stop listening");
        }
    }

    pub fn is_running(&self) -> bool {
        self.accept_task.lock().unwrap_or_else(PoisonError::into_inner).as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn active_requests(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Stops the listener, releases its address and waits for in-flight requests.
    ///
    /// The wait is bounded by the dispose timeout. Returns `true` if every
    /// request finished in time.
    pub async fn dispose(&self) -> bool {
        self.stop();
        self.socket.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(server) = self.server.upgrade() {
            server.dispatcher.unregister(self.addr, self);
        }

        let deadline = Instant::now() + self.dispose_timeout;
        loop {
            let active = self.active_requests();
            if active == 0 {
                info!(addr = %self.addr, "listener drained");
                return true;
            }
            if Instant::now() >= deadline {
                warn!(addr = %self.addr, active, timeout = ?self.dispose_timeout, "listener dispose timed out with requests still in flight");
                return false;
            }
            sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    pub(crate) fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    pub(crate) fn route(&self, method: &http::Method, path: &str) -> Result<RouteMatch, ServerError> {
        self.routes.lookup(method, path)
    }

    pub(crate) fn track_request(&self) -> ActiveRequest {
        self.active.fetch_add(1, Ordering::AcqRel);
        ActiveRequest { active: Arc::clone(&self.active) }
    }
}

/// Counts one in-flight request until dropped.
#[derive(Debug)]
pub(crate) struct ActiveRequest {
    active: Arc<AtomicUsize>,
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn accept_loop(socket: Arc<TcpListener>, addr: SocketAddr, server: Weak<ServerShared>) {
    loop {
        let (tcp_stream, remote_addr) = match socket.accept().await {
            Ok(stream_and_addr) => stream_and_addr,
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };

        let Some(server) = server.upgrade() else {
            debug!(%addr, "server dropped, accept loop exits");
            return;
        };

        let local_addr = tcp_stream.local_addr().unwrap_or(addr);
        if let Err(e) = tcp_stream.set_nodelay(true) {
            debug!(cause = %e, "can't set nodelay");
        }

        tokio::spawn(async move {
            let (reader, writer) = tcp_stream.into_split();
            let connection = HttpConnection::new(reader, writer, server, local_addr, remote_addr);
            match connection.process().await {
                Ok(()) => debug!(%remote_addr, "connection closed"),
                Err(e) => error!(%remote_addr, cause = %e, "connection closed with error"),
            }
        });
    }
}
