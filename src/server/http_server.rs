use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::config::ServerConfig;
use crate::http::connection::{ConnectionError, ConnectionSettings, ErrorHook};
use crate::http::request::{Method, Request};
use crate::http::response::Reply;
use crate::reactor::{Interest, Reactor, ReactorError, ReactorHandle};
use crate::router::Router;
use crate::server::acceptor::{Acceptor, Placement};
use crate::server::listener::{BindError, Listener};
use crate::server::pool::WorkerPool;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Reactor(#[from] ReactorError),

    #[error("the server has already been dispatched; routes and settings are frozen")]
    AlreadyStarted,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("{0}")]
    Worker(String),
}

/// Router and settings as seen by running connections.
struct Frozen {
    router: Arc<Router>,
    settings: Arc<ConnectionSettings>,
}

/// HTTP server wiring listeners, a shared router and a reactor together.
///
/// Routes and settings can be changed until the first [`dispatch`](Self::dispatch);
/// after that they are shared with live connections and every setter fails
/// with [`ServerError::AlreadyStarted`].
///
/// # Example
///
/// ```no_run
/// # use eventhttp::{HttpServer, Reactor};
/// # fn main() -> anyhow::Result<()> {
/// let mut server = HttpServer::new(Reactor::new()?);
/// server.bind("127.0.0.1", 8088)?;
/// server.set_callback("/about", |_req, reply| {
///     let _ = reply.reply(200, "OK");
/// })?;
/// server.dispatch()?;
/// # Ok(())
/// # }
/// ```
pub struct HttpServer {
    reactor: Reactor,
    router: Router,
    settings: ConnectionSettings,
    on_error: Option<ErrorHook>,
    backlog: i32,
    workers: usize,
    pending: Vec<Listener>,
    local_addrs: Vec<SocketAddr>,
    frozen: Option<Frozen>,
    pool: WorkerPool,
}

impl HttpServer {
    pub fn new(reactor: Reactor) -> Self {
        Self::with_config(reactor, &ServerConfig::default())
    }

    pub fn with_config(reactor: Reactor, config: &ServerConfig) -> Self {
        Self {
            reactor,
            router: Router::new(),
            settings: config.connection_settings(),
            on_error: None,
            backlog: config.backlog,
            workers: config.workers,
            pending: Vec::new(),
            local_addrs: Vec::new(),
            frozen: None,
            pool: WorkerPool::new(),
        }
    }

    /// Binds a listener with the configured backlog.
    ///
    /// Every call is independent: a failed bind leaves previously bound
    /// listeners untouched.
    pub fn bind(&mut self, host: &str, port: u16) -> Result<SocketAddr, BindError> {
        self.bind_with_backlog(host, port, self.backlog)
    }

    pub fn bind_with_backlog(
        &mut self,
        host: &str,
        port: u16,
        backlog: i32,
    ) -> Result<SocketAddr, BindError> {
        let listener = Listener::bind(host, port, backlog)?;
        let addr = listener.local_addr();

        // Before dispatch this only queues the listener.
        self.register_listener(listener)
            .map_err(|e| BindError::Io {
                addr: addr.to_string(),
                source: io::Error::other(e),
            })?;

        self.local_addrs.push(addr);
        Ok(addr)
    }

    /// Routes requests for exactly `path` to `handler`.
    ///
    /// Registering the same path again replaces the earlier handler.
    pub fn set_callback<F>(&mut self, path: impl Into<String>, handler: F) -> Result<(), ServerError>
    where
        F: Fn(&Request, &mut Reply) + Send + Sync + 'static,
    {
        self.ensure_configurable()?;
        self.router.register_path(path, handler);
        Ok(())
    }

    /// Replaces the handler for unregistered paths (a 404 responder by default).
    pub fn set_default_callback<F>(&mut self, handler: F) -> Result<(), ServerError>
    where
        F: Fn(&Request, &mut Reply) + Send + Sync + 'static,
    {
        self.ensure_configurable()?;
        self.router.set_default(handler);
        Ok(())
    }

    pub fn remove_callback(&mut self, path: &str) -> Result<bool, ServerError> {
        self.ensure_configurable()?;
        Ok(self.router.remove_path(path))
    }

    /// Restricts dispatch to `methods`; other methods get `501 Not Implemented`.
    pub fn set_allowed_methods(&mut self, methods: &[Method]) -> Result<(), ServerError> {
        self.ensure_configurable()?;
        self.settings.allowed_methods = Some(methods.to_vec());
        Ok(())
    }

    pub fn set_max_body_size(&mut self, bytes: usize) -> Result<(), ServerError> {
        self.ensure_configurable()?;
        self.settings.limits.max_body_size = bytes;
        Ok(())
    }

    pub fn set_max_headers_size(&mut self, bytes: usize) -> Result<(), ServerError> {
        self.ensure_configurable()?;
        self.settings.limits.max_headers_size = bytes;
        Ok(())
    }

    /// Sets the idle timeout of connections; `None` disables it.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), ServerError> {
        self.ensure_configurable()?;
        self.settings.idle_timeout = timeout;
        Ok(())
    }

    pub fn set_keep_alive(&mut self, enabled: bool) -> Result<(), ServerError> {
        self.ensure_configurable()?;
        self.settings.keep_alive = enabled;
        Ok(())
    }

    /// Number of worker reactors; 0 serves every connection on the dispatching thread.
    pub fn set_workers(&mut self, workers: usize) -> Result<(), ServerError> {
        self.ensure_configurable()?;
        self.workers = workers;
        Ok(())
    }

    /// Installs an observer for per-connection failures.
    pub fn on_error<F>(&mut self, hook: F) -> Result<(), ServerError>
    where
        F: Fn(&ConnectionError) + Send + Sync + 'static,
    {
        self.ensure_configurable()?;
        self.on_error = Some(Arc::new(hook));
        Ok(())
    }

    /// Addresses of every listener bound so far.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    pub fn reactor_mut(&mut self) -> &mut Reactor {
        &mut self.reactor
    }

    /// Handle that stops [`dispatch`](Self::dispatch) from any thread.
    pub fn stop_handle(&self) -> ReactorHandle {
        self.reactor.handle()
    }

    /// Starts serving and blocks until stopped.
    ///
    /// The first call freezes routes and settings and registers every bound
    /// listener. With workers configured, they run alongside and are paused
    /// before this returns; their connections stay open for the next call.
    /// A worker whose reactor fails stops the server and its error is
    /// returned here.
    pub fn dispatch(&mut self) -> Result<(), ServerError> {
        self.freeze()?;

        if self.workers > 0 {
            let dispatcher = self.reactor.handle();
            if let Err(e) = self.pool.resume(self.workers, &dispatcher) {
                let _ = self.pool.pause();
                return Err(e);
            }
        }

        info!(
            listeners = self.local_addrs.len(),
            workers = self.workers,
            "dispatching"
        );

        let result = self.reactor.run();
        let paused = self.pool.pause();

        result?;
        paused
    }

    fn ensure_configurable(&self) -> Result<(), ServerError> {
        if self.frozen.is_some() {
            Err(ServerError::AlreadyStarted)
        } else {
            Ok(())
        }
    }

    fn freeze(&mut self) -> Result<(), ServerError> {
        if self.frozen.is_some() {
            return Ok(());
        }

        self.frozen = Some(Frozen {
            router: Arc::new(std::mem::take(&mut self.router)),
            settings: Arc::new(self.settings.clone()),
        });

        for listener in std::mem::take(&mut self.pending) {
            self.register_listener(listener)?;
        }
        Ok(())
    }

    fn register_listener(&mut self, listener: Listener) -> Result<(), ReactorError> {
        let Some(frozen) = &self.frozen else {
            self.pending.push(listener);
            return Ok(());
        };

        let placement = if self.workers > 0 {
            Placement::Workers(self.pool.workers())
        } else {
            Placement::Local
        };
        let acceptor = Acceptor::new(
            listener,
            Arc::clone(&frozen.router),
            Arc::clone(&frozen.settings),
            self.on_error.clone(),
            placement,
        );

        self.reactor.register(Box::new(acceptor), Interest::Read)?;
        Ok(())
    }
}
