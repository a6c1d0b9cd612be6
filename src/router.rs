//! Exact-path request routing.
//!
//! The router is a flat map from path to handler with one fallback. There
//! is no prefix or pattern matching: a request either names a registered
//! path exactly or goes to the default handler.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::http::request::Request;
use crate::http::response::{Reply, Response};

/// Something that answers requests.
///
/// A handler gets the request and a [`Reply`] handle and is expected to reply
/// through it exactly once. Handlers run on the reactor thread, so they
/// should finish quickly.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: &Request, reply: &mut Reply);
}

impl<F> Handler for F
where
    F: Fn(&Request, &mut Reply) + Send + Sync + 'static,
{
    fn handle(&self, request: &Request, reply: &mut Reply) {
        self(request, reply)
    }
}

/// Default handler answering `404 Not Found`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

impl Handler for NotFound {
    fn handle(&self, _request: &Request, reply: &mut Reply) {
        // A fresh reply handle cannot already be used.
        let _ = reply.send(Response::not_found());
    }
}

pub struct Router {
    routes: HashMap<String, Arc<dyn Handler>>,
    default: Arc<dyn Handler>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            default: Arc::new(NotFound),
        }
    }

    /// Binds `path` to a closure. A later registration for the same path
    /// replaces the earlier one.
    pub fn register_path<F>(&mut self, path: impl Into<String>, handler: F)
    where
        F: Fn(&Request, &mut Reply) + Send + Sync + 'static,
    {
        self.register_arc(path, Arc::new(handler));
    }

    /// Binds `path` to any [`Handler`] value.
    pub fn register_handler(&mut self, path: impl Into<String>, handler: impl Handler) {
        self.register_arc(path, Arc::new(handler));
    }

    /// Same as [`register_path`](Self::register_path) for an already shared handler.
    pub fn register_arc(&mut self, path: impl Into<String>, handler: Arc<dyn Handler>) {
        let path = path.into();
        if self.routes.insert(path.clone(), handler).is_some() {
            debug!(path = %path, "route replaced");
        } else {
            debug!(path = %path, "route registered");
        }
    }

    /// Unbinds `path`. Returns `false` if it was not registered.
    pub fn remove_path(&mut self, path: &str) -> bool {
        self.routes.remove(path).is_some()
    }

    /// Replaces the handler used for unregistered paths.
    pub fn set_default<F>(&mut self, handler: F)
    where
        F: Fn(&Request, &mut Reply) + Send + Sync + 'static,
    {
        self.default = Arc::new(handler);
    }

    pub fn set_default_handler(&mut self, handler: impl Handler) {
        self.default = Arc::new(handler);
    }

    /// Returns the handler for `path`, or the default handler.
    pub fn resolve(&self, path: &str) -> &Arc<dyn Handler> {
        self.routes.get(path).unwrap_or(&self.default)
    }

    pub fn default_handler(&self) -> &Arc<dyn Handler> {
        &self.default
    }

    pub fn contains(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
