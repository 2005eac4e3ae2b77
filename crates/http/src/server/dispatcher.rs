use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use crate::server::{Listener, ServerError};

/// Maps local addresses to the listener that owns them.
///
/// Reads go through an immutable snapshot; every mutation copies the table
/// under one lock and publishes the new snapshot.
#[derive(Debug, Default)]
pub(crate) struct Dispatcher {
    table: ArcSwap<HashMap<SocketAddr, Arc<Listener>>>,
    mutation: Mutex<()>,
}

impl Dispatcher {
    pub(crate) fn register(&self, listener: Arc<Listener>) -> Result<(), ServerError> {
        let _guard = self.mutation.lock().unwrap_or_else(PoisonError::into_inner);
        let addr = listener.local_addr();
        let current = self.table.load();
        if current.contains_key(&addr) {
            return Err(ServerError::DuplicateBind { addr });
        }

        let mut table = HashMap::clone(&current);
        table.insert(addr, listener);
        self.table.store(Arc::new(table));
        Ok(())
    }

    /// Removes `listener` from `addr`, unless another listener took that address since.
    pub(crate) fn unregister(&self, addr: SocketAddr, listener: &Listener) -> bool {
        let _guard = self.mutation.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.table.load();
        match current.get(&addr) {
            Some(registered) if std::ptr::eq(Arc::as_ptr(registered), listener) => {
                let mut table = HashMap::clone(&current);
                table.remove(&addr);
                self.table.store(Arc::new(table));
                true
            }
            _ => false,
        }
    }

    /// Finds the listener for a connection accepted on `local_addr`.
    ///
    /// A listener bound to the unspecified address owns every local address
    /// of its family on its port.
    pub(crate) fn resolve(&self, local_addr: SocketAddr) -> Option<Arc<Listener>> {
        let table = self.table.load();
        if let Some(listener) = table.get(&local_addr) {
            return Some(Arc::clone(listener));
        }

        let unspecified = match local_addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        table.get(&SocketAddr::new(unspecified, local_addr.port())).map(Arc::clone)
    }

    pub(crate) fn listeners(&self) -> Vec<Arc<Listener>> {
        self.table.load().values().map(Arc::clone).collect()
    }
}
