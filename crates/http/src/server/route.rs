//! Path routing inside one listener.
//!
//! Routes are kept in a mutable table keyed by path pattern and compiled into
//! a `matchit` router after every change. Lookups read the compiled snapshot
//! without locking. Request paths are percent-decoded before matching, so
//! patterns and captured parameters are plain text.

use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use arc_swap::ArcSwap;
use http::{Extensions, Method};
use percent_encoding::percent_decode_str;
use tracing::debug;

use crate::server::{Handler, HandlerContext, ServerError};

/// Path parameters captured by the route pattern, inserted into request extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// Options of one registration: the accepted methods and context values.
#[derive(Debug, Default)]
pub struct RouteOptions {
    methods: Option<Vec<Method>>,
    values: Extensions,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.methods.get_or_insert_with(Vec::new).push(method);
        self
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods.get_or_insert_with(Vec::new).extend(methods);
        self
    }

    /// Adds a value handed to the handler through [`HandlerContext`].
    pub fn value<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.values.insert(value);
        self
    }
}

struct RouteEntry {
    id: u64,
    methods: Option<Vec<Method>>,
    handler: Arc<dyn Handler>,
    context: HandlerContext,
}

impl RouteEntry {
    fn accepts(&self, method: &Method) -> bool {
        self.methods.as_ref().is_none_or(|methods| methods.contains(method) || (method == Method::HEAD && methods.contains(&Method::GET)))
    }
}

pub(crate) struct RouteMatch {
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) context: HandlerContext,
    pub(crate) params: PathParams,
}

#[derive(Default)]
struct RouteTable {
    next_id: u64,
    by_path: HashMap<String, Vec<Arc<RouteEntry>>>,
}

pub(crate) struct RouteRegistry {
    listener_addr: SocketAddr,
    table: Mutex<RouteTable>,
    router: ArcSwap<matchit::Router<Vec<Arc<RouteEntry>>>>,
}

impl std::fmt::Debug for RouteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let paths: Vec<String> = self.table.lock().unwrap_or_else(PoisonError::into_inner).by_path.keys().cloned().collect();
        f.debug_struct("RouteRegistry").field("listener_addr", &self.listener_addr).field("paths", &paths).finish()
    }
}

impl RouteRegistry {
    pub(crate) fn new(listener_addr: SocketAddr) -> Self {
        Self { listener_addr, table: Mutex::new(RouteTable::default()), router: ArcSwap::from_pointee(matchit::Router::new()) }
    }

    pub(crate) fn add(self: &Arc<Self>, path: &str, options: RouteOptions, handler: Arc<dyn Handler>) -> Result<RegistrationHandle, ServerError> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let id = table.next_id;
        table.next_id += 1;

        let entry = RouteEntry { id, methods: options.methods, handler, context: HandlerContext::new(self.listener_addr, options.values) };
        table.by_path.entry(path.to_owned()).or_default().push(Arc::new(entry));

        if let Err(e) = self.rebuild(&table) {
            // roll back so a bad pattern never poisons the table
            if let Some(entries) = table.by_path.get_mut(path) {
                entries.retain(|entry| entry.id != id);
                if entries.is_empty() {
                    table.by_path.remove(path);
                }
            }
            return Err(e);
        }

        debug!(listener = %self.listener_addr, path, "route registered");
        Ok(RegistrationHandle { registry: Arc::downgrade(self), path: path.to_owned(), id })
    }

    fn remove(&self, path: &str, id: u64) -> bool {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = table.by_path.get_mut(path) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            table.by_path.remove(path);
        }
        if removed {
            // every remaining pattern was accepted before, rebuilding can't fail
            let _ = self.rebuild(&table);
            debug!(listener = %self.listener_addr, path, "route removed");
        }
        removed
    }

    fn rebuild(&self, table: &RouteTable) -> Result<(), ServerError> {
        let mut router = matchit::Router::new();
        for (path, entries) in &table.by_path {
            router
                .insert(path.as_str(), entries.clone())
                .map_err(|e| ServerError::InvalidRoute { path: path.clone(), reason: e.to_string() })?;
        }
        self.router.store(Arc::new(router));
        Ok(())
    }

    pub(crate) fn lookup(&self, method: &Method, raw_path: &str) -> Result<RouteMatch, ServerError> {
        let path = decode_path(raw_path)?;
        let router = self.router.load();
        let matched = router.at(&path).map_err(|_not_found| ServerError::NoHandlerForPath { path: (*path).to_owned() })?;

        let params = PathParams(matched.params.iter().map(|(key, value)| (key.to_owned(), value.to_owned())).collect());

        // the latest registration for a path wins
        match matched.value.iter().rev().find(|entry| entry.accepts(method)) {
            Some(entry) => Ok(RouteMatch { handler: Arc::clone(&entry.handler), context: entry.context.clone(), params }),
            None => {
                let mut allowed: Vec<Method> = Vec::new();
                for entry in matched.value {
                    for method in entry.methods.iter().flatten() {
                        if !allowed.contains(method) {
                            allowed.push(method.clone());
                        }
                    }
                }
                Err(ServerError::MethodNotAllowed { method: method.clone(), allowed })
            }
        }
    }
}

fn decode_path(raw: &str) -> Result<Cow<'_, str>, ServerError> {
    percent_decode_str(raw).decode_utf8().map_err(|e| ServerError::MalformedPath { path: raw.to_owned(), reason: e.to_string() })
}

/// Returned by handler registration; removes the handler again.
#[derive(Debug)]
pub struct RegistrationHandle {
    registry: Weak<RouteRegistry>,
    path: String,
    id: u64,
}

impl RegistrationHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Unregisters the handler. Returns `false` if it was already gone.
    pub fn remove(self) -> bool {
        self.registry.upgrade().is_some_and(|registry| registry.remove(&self.path, self.id))
    }
}
