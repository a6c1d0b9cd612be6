use std::sync::Arc;

use mio::event::Source;
use tracing::{debug, error, warn};

use crate::http::connection::{Connection, ConnectionSettings, ErrorHook};
use crate::reactor::{Context, EventHandler, Interest, Next, ReactorError, Ready};
use crate::router::Router;
use crate::server::listener::{AcceptError, Listener};
use crate::server::pool::Workers;

/// Consecutive aborted accepts tolerated within one readiness event.
const MAX_ABORTED_ACCEPTS: usize = 64;

/// Where accepted connections are registered.
pub(crate) enum Placement {
    /// On the reactor that owns the listener.
    Local,
    /// Round-robin across worker reactors.
    Workers(Arc<Workers>),
}

/// Reactor callback for a listener: drains `accept` and registers connections.
pub(crate) struct Acceptor {
    listener: Listener,
    router: Arc<Router>,
    settings: Arc<ConnectionSettings>,
    on_error: Option<ErrorHook>,
    placement: Placement,
}

impl Acceptor {
    pub(crate) fn new(
        listener: Listener,
        router: Arc<Router>,
        settings: Arc<ConnectionSettings>,
        on_error: Option<ErrorHook>,
        placement: Placement,
    ) -> Self {
        Self {
            listener,
            router,
            settings,
            on_error,
            placement,
        }
    }

    fn place(&self, ctx: &mut Context<'_>, connection: Box<Connection>) {
        if let Placement::Workers(workers) = &self.placement {
            if let Some(worker) = workers.pick() {
                if let Err(e) = worker.submit(connection, Interest::Read) {
                    warn!(error = %e, "failed to wake worker reactor");
                }
                return;
            }
        }
        ctx.register(connection, Interest::Read);
    }
}

impl EventHandler for Acceptor {
    fn source(&mut self) -> &mut dyn Source {
        self.listener.source_mut()
    }

    fn ready(&mut self, ctx: &mut Context<'_>, _ready: Ready) -> Result<Next, ReactorError> {
        let mut aborted = 0;

        loop {
            match self.listener.accept() {
                Ok(Some((stream, peer))) => {
                    debug!(peer = %peer, listener = %self.listener.local_addr(), "accepted connection");

                    let connection = Connection::new(
                        stream,
                        peer,
                        Arc::clone(&self.router),
                        Arc::clone(&self.settings),
                        self.on_error.clone(),
                    );
                    self.place(ctx, Box::new(connection));
                }
                Ok(None) => return Ok(Next::Read),
                Err(AcceptError::ResourceExhausted(e)) => {
                    error!(listener = %self.listener.local_addr(), error = %e, "cannot accept connections");
                    return Err(ReactorError::ResourceExhausted(e));
                }
                Err(AcceptError::Aborted(e)) => {
                    warn!(listener = %self.listener.local_addr(), error = %e, "accept failed");
                    aborted += 1;
                    if aborted >= MAX_ABORTED_ACCEPTS {
                        return Ok(Next::Read);
                    }
                }
            }
        }
    }
}
