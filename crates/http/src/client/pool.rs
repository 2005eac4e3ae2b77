use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::client::Endpoint;
use crate::connection::ClientConnection;

struct IdleConnection {
    connection: ClientConnection,
    since: Instant,
}

/// Idle persistent connections keyed by endpoint.
///
/// Connections idle for longer than the idle timeout are evicted on access.
pub(crate) struct ConnectionPool {
    idle_timeout: Duration,
    idle: Mutex<HashMap<Endpoint, Vec<IdleConnection>>>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool").field("idle_timeout", &self.idle_timeout).field("idle", &self.idle_count()).finish()
    }
}

impl ConnectionPool {
    pub(crate) fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout, idle: Mutex::new(HashMap::new()) }
    }

    /// Takes the most recently returned live connection to `endpoint`.
    pub(crate) fn checkout(&self, endpoint: &Endpoint) -> Option<ClientConnection> {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        let connections = idle.get_mut(endpoint)?;
        connections.retain(|idle| idle.since.elapsed() < self.idle_timeout);

        let connection = connections.pop().map(|idle| idle.connection);
        if connections.is_empty() {
            idle.remove(endpoint);
        }
        if connection.is_some() {
            trace!(%endpoint, "reusing idle connection");
        }
        connection
    }

    pub(crate) fn checkin(&self, endpoint: Endpoint, connection: ClientConnection) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        let connections = idle.entry(endpoint).or_default();
        connections.retain(|idle| idle.since.elapsed() < self.idle_timeout);
        connections.push(IdleConnection { connection, since: Instant::now() });
    }

    pub(crate) fn clear(&self) {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HeaderLimits;
    use http::uri::Scheme;

    fn connection() -> ClientConnection {
        let (transport, _peer) = tokio::io::duplex(64);
        ClientConnection::new(Box::new(transport), HeaderLimits::default(), 1024)
    }

    #[tokio::test]
    async fn reuses_and_evicts() {
        let endpoint = Endpoint::new(Scheme::HTTP, "a.test", 80);
        let pool = ConnectionPool::new(Duration::from_millis(50));

        pool.checkin(endpoint.clone(), connection());
        assert_eq!(pool.idle_count(), 1);
        assert!(pool.checkout(&endpoint).is_some());
        assert!(pool.checkout(&endpoint).is_none());

        pool.checkin(endpoint.clone(), connection());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(pool.checkout(&endpoint).is_none());
        assert_eq!(pool.idle_count(), 0);
    }
}
