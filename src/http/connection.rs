use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use mio::event::Source;
use mio::net::TcpStream;
use thiserror::Error;
use tracing::{debug, warn};

use crate::http::parser::{Limits, ParseError, RequestParser};
use crate::http::request::{Method, Request, Version};
use crate::http::response::{Reply, Response, StatusCode};
use crate::http::writer::{ConnectionHeader, ResponseWriter};
use crate::reactor::{Context, EventHandler, Next, ReactorError, Ready};
use crate::router::Router;

const READ_CHUNK: usize = 8192;

/// Per-connection behaviour shared by every connection of a server.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub limits: Limits,
    /// Whether connections may serve more than one request.
    pub keep_alive: bool,
    /// Idle time after which a connection is closed; `None` never expires.
    pub idle_timeout: Option<Duration>,
    /// Methods that are dispatched; `None` allows every method.
    pub allowed_methods: Option<Vec<Method>>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            keep_alive: true,
            idle_timeout: Some(Duration::from_secs(60)),
            allowed_methods: None,
        }
    }
}

impl ConnectionSettings {
    pub fn allows(&self, method: Method) -> bool {
        self.allowed_methods
            .as_ref()
            .is_none_or(|methods| methods.contains(&method))
    }
}

/// Failures that end a single connection. They never stop the reactor.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error on connection from {peer}: {source}")]
    Io {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("malformed request from {peer}: {source}")]
    Parse {
        peer: SocketAddr,
        #[source]
        source: ParseError,
    },

    #[error("connection from {peer} idle for more than {timeout:?}")]
    TimedOut { peer: SocketAddr, timeout: Duration },

    #[error("connection from {peer} closed in the middle of a request")]
    Closed { peer: SocketAddr },
}

impl ConnectionError {
    pub fn peer(&self) -> SocketAddr {
        match self {
            ConnectionError::Io { peer, .. }
            | ConnectionError::Parse { peer, .. }
            | ConnectionError::TimedOut { peer, .. }
            | ConnectionError::Closed { peer } => *peer,
        }
    }
}

/// Observer for connection failures.
pub type ErrorHook = Arc<dyn Fn(&ConnectionError) + Send + Sync>;

#[derive(Debug)]
pub enum ConnectionState {
    Reading,
    Writing {
        writer: ResponseWriter,
        keep_alive: bool,
    },
    Closed,
}

/// Outcome of one step of the state machine.
enum Step {
    /// The state changed, keep going.
    Continue,
    /// Blocked on the socket, wait for readiness.
    Wait(Next),
}

/// One accepted client socket, serving requests until it closes.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: BytesMut,
    parser: RequestParser,
    state: ConnectionState,
    router: Arc<Router>,
    settings: Arc<ConnectionSettings>,
    on_error: Option<ErrorHook>,
    last_activity: Instant,
    peer_closed: bool,
    served: u64,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        router: Arc<Router>,
        settings: Arc<ConnectionSettings>,
        on_error: Option<ErrorHook>,
    ) -> Self {
        Self {
            stream,
            peer,
            buffer: BytesMut::with_capacity(4096),
            parser: RequestParser::new(settings.limits),
            state: ConnectionState::Reading,
            router,
            settings,
            on_error,
            last_activity: Instant::now(),
            peer_closed: false,
            served: 0,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Number of responses fully written on this connection.
    pub fn requests_served(&self) -> u64 {
        self.served
    }

    fn drive(&mut self) -> Next {
        loop {
            let step = match self.state {
                ConnectionState::Reading => self.read_step(),
                ConnectionState::Writing { .. } => self.write_step(),
                ConnectionState::Closed => {
                    debug!(peer = %self.peer, served = self.served, "connection closed");
                    return Next::Close;
                }
            };

            if let Step::Wait(next) = step {
                return next;
            }
        }
    }

    fn read_step(&mut self) -> Step {
        let mut temp = [0u8; READ_CHUNK];

        loop {
            // Try parsing whatever we already have
            match self.parser.parse(&mut self.buffer) {
                Ok(Some(request)) => {
                    self.respond(request);
                    return Step::Continue;
                }
                Ok(None) => {}
                Err(e) => {
                    self.reject(e);
                    return Step::Continue;
                }
            }

            if self.peer_closed {
                if !self.parser.is_idle() || !self.buffer.is_empty() {
                    self.report(ConnectionError::Closed { peer: self.peer });
                }
                self.state = ConnectionState::Closed;
                return Step::Continue;
            }

            match self.stream.read(&mut temp) {
                Ok(0) => {
                    // Client closed its side; answer what is buffered, then close.
                    self.peer_closed = true;
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&temp[..n]);
                    self.last_activity = Instant::now();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Step::Wait(Next::Read);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.fail(e);
                    return Step::Continue;
                }
            }
        }
    }

    fn write_step(&mut self) -> Step {
        let ConnectionState::Writing { writer, keep_alive } = &mut self.state else {
            return Step::Continue;
        };
        let keep_alive = *keep_alive;
        let before = writer.remaining();

        match writer.write_to(&mut self.stream) {
            Ok(true) => {
                self.last_activity = Instant::now();
                self.served += 1;
                self.state = if keep_alive {
                    ConnectionState::Reading
                } else {
                    ConnectionState::Closed
                };
                Step::Continue
            }
            Ok(false) => {
                if writer.remaining() < before {
                    self.last_activity = Instant::now();
                }
                Step::Wait(Next::Write)
            }
            Err(e) => {
                self.fail(e);
                Step::Continue
            }
        }
    }

    fn respond(&mut self, mut request: Request) {
        request.peer = Some(self.peer);

        let response = self.dispatch(&request);
        let keep_alive = self.settings.keep_alive
            && request.keep_alive()
            && !self.peer_closed
            && !response.wants_close();

        let connection = if !keep_alive {
            ConnectionHeader::Close
        } else if request.version == Version::Http10 {
            ConnectionHeader::KeepAlive
        } else {
            ConnectionHeader::Unchanged
        };

        debug!(
            peer = %self.peer,
            method = %request.method,
            path = %request.path,
            status = response.status.as_u16(),
            keep_alive,
            "request dispatched"
        );

        let head_only = request.method == Method::HEAD;
        self.state = ConnectionState::Writing {
            writer: ResponseWriter::with_options(&response, head_only, connection),
            keep_alive,
        };
    }

    fn dispatch(&self, request: &Request) -> Response {
        if !self.settings.allows(request.method) {
            return Response::error(StatusCode::NOT_IMPLEMENTED);
        }

        let handler = self.router.resolve(&request.path);
        let mut reply = Reply::new();
        handler.handle(request, &mut reply);

        reply.into_response().unwrap_or_else(|| {
            warn!(
                peer = %self.peer,
                path = %request.path,
                "handler returned without replying"
            );
            Response::internal_error()
        })
    }

    /// Queues a synthetic error response and marks the connection for closing.
    fn reject(&mut self, error: ParseError) {
        let status = error.status();
        debug!(peer = %self.peer, error = %error, status = status.as_u16(), "rejecting request");

        self.report(ConnectionError::Parse {
            peer: self.peer,
            source: error,
        });
        self.parser.reset();
        self.buffer.clear();

        let response = Response::error(status);
        self.state = ConnectionState::Writing {
            writer: ResponseWriter::with_options(&response, false, ConnectionHeader::Close),
            keep_alive: false,
        };
    }

    fn fail(&mut self, error: io::Error) {
        debug!(peer = %self.peer, error = %error, "connection I/O error");
        self.report(ConnectionError::Io {
            peer: self.peer,
            source: error,
        });
        self.state = ConnectionState::Closed;
    }

    fn report(&self, error: ConnectionError) {
        if let Some(hook) = &self.on_error {
            hook(&error);
        }
    }
}

impl EventHandler for Connection {
    fn source(&mut self) -> &mut dyn Source {
        &mut self.stream
    }

    fn ready(&mut self, _ctx: &mut Context<'_>, _ready: Ready) -> Result<Next, ReactorError> {
        Ok(self.drive())
    }

    // A timeout too large to represent as an instant never expires.
    fn deadline(&self) -> Option<Instant> {
        self.settings
            .idle_timeout
            .and_then(|timeout| self.last_activity.checked_add(timeout))
    }

    fn timed_out(&mut self) {
        if let Some(timeout) = self.settings.idle_timeout {
            debug!(peer = %self.peer, ?timeout, "idle connection timed out");
            self.report(ConnectionError::TimedOut {
                peer: self.peer,
                timeout,
            });
        }
        self.state = ConnectionState::Closed;
    }
}
