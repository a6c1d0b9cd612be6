//! Readiness-driven event loop.
//!
//! A [`Reactor`] owns a `mio::Poll` and a table of [`EventHandler`]s keyed
//! by token. Each handler owns the event source it is registered for and is
//! called back when that source becomes ready:
//!
//! ```text
//!   register(handler, Interest::Read)
//!              │
//!              ▼
//!   ┌────────────────────┐   readiness   ┌──────────────────────────┐
//!   │ mio::Poll (epoll/  │ ────────────▶ │ handler.ready(ctx, ready)│
//!   │ kqueue)            │               └────────────┬─────────────┘
//!   └────────────────────┘                            │
//!              ▲               Next::Read / Write     │
//!              └──────── re-register on change ◀──────┤
//!                              Next::Close            │
//!                     deregister + drop ◀─────────────┘
//! ```
//!
//! Every handle is registered for exactly one interest at a time. Callbacks
//! run one at a time on the thread calling [`Reactor::run`]; handlers
//! registered from inside a callback are added once that callback returns.
//!
//! # Example
//!
//! ```ignore
//! let mut reactor = Reactor::new()?;
//! reactor.register(Box::new(my_handler), Interest::Read)?;
//!
//! let handle = reactor.handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(Duration::from_secs(5));
//!     handle.stop();
//! });
//!
//! reactor.run()?;
//! ```

pub mod handle;

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::{Events, Poll, Token, Waker};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use handle::ReactorHandle;
use handle::Shared;

const WAKER_TOKEN: Token = Token(usize::MAX);
const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("failed to set up the poller: {0}")]
    Setup(#[source] io::Error),

    #[error("polling for readiness failed: {0}")]
    Poll(#[source] io::Error),

    #[error("failed to register an event source: {0}")]
    Register(#[source] io::Error),

    #[error("system resources exhausted: {0}")]
    ResourceExhausted(#[source] io::Error),
}

/// The single readiness a handle waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

impl From<Interest> for mio::Interest {
    fn from(interest: Interest) -> Self {
        match interest {
            Interest::Read => mio::Interest::READABLE,
            Interest::Write => mio::Interest::WRITABLE,
        }
    }
}

/// What a handler wants after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Read,
    Write,
    Close,
}

impl Next {
    fn interest(self) -> Option<Interest> {
        match self {
            Next::Read => Some(Interest::Read),
            Next::Write => Some(Interest::Write),
            Next::Close => None,
        }
    }
}

/// Readiness reported for one handle in one poll pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ready {
    pub readable: bool,
    pub writable: bool,
    /// The peer closed its side or the socket hung up.
    pub closed: bool,
    pub error: bool,
}

impl Ready {
    fn from_event(event: &mio::event::Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            closed: event.is_read_closed() || event.is_write_closed(),
            error: event.is_error(),
        }
    }
}

/// A callback bound to one event source.
pub trait EventHandler: Send {
    /// The source registered with the poller on behalf of this handler.
    fn source(&mut self) -> &mut dyn Source;

    /// Called when the source is ready for its current interest.
    ///
    /// Returning `Err` is fatal: [`Reactor::run`] stops and reports it.
    fn ready(&mut self, ctx: &mut Context<'_>, ready: Ready) -> Result<Next, ReactorError>;

    /// Instant after which the handler is expired and closed.
    fn deadline(&self) -> Option<Instant> {
        None
    }

    /// Called right before an expired handler is dropped.
    fn timed_out(&mut self) {}
}

type Pending = Vec<(Box<dyn EventHandler>, Interest)>;

/// Access to the reactor from inside a callback.
pub struct Context<'a> {
    token: Token,
    pending: &'a mut Pending,
    shared: &'a Shared,
}

impl Context<'_> {
    /// Token of the handler being called.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Queues a new handler; it is registered once the current callback returns.
    pub fn register(&mut self, handler: Box<dyn EventHandler>, interest: Interest) {
        self.pending.push((handler, interest));
    }

    /// Ends [`Reactor::run`] after the current pass.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }
}

struct Entry {
    handler: Box<dyn EventHandler>,
    interest: Interest,
}

/// The I/O multiplexer.
pub struct Reactor {
    poll: Poll,
    events: Events,
    entries: HashMap<Token, Entry>,
    next_token: usize,
    shared: Arc<Shared>,
}

impl Reactor {
    pub fn new() -> Result<Self, ReactorError> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a reactor receiving at most `events` readiness events per poll.
    pub fn with_capacity(events: usize) -> Result<Self, ReactorError> {
        let poll = Poll::new().map_err(ReactorError::Setup)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN).map_err(ReactorError::Setup)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(events.max(1)),
            entries: HashMap::new(),
            next_token: 0,
            shared: Arc::new(Shared::new(waker)),
        })
    }

    /// A thread-safe handle for stopping the reactor or submitting handlers.
    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle::new(Arc::clone(&self.shared))
    }

    /// Stops a running loop; see [`ReactorHandle::stop`].
    pub fn stop(&self) {
        self.handle().stop();
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers `handler` for `interest` and takes ownership of it.
    pub fn register(
        &mut self,
        mut handler: Box<dyn EventHandler>,
        interest: Interest,
    ) -> Result<Token, ReactorError> {
        let token = self.allocate_token();

        self.poll
            .registry()
            .register(handler.source(), token, interest.into())
            .map_err(register_error)?;
        self.entries.insert(token, Entry { handler, interest });

        Ok(token)
    }

    /// Deregisters and drops the handler behind `token`.
    ///
    /// Returns `false` if no such handler exists.
    pub fn deregister(&mut self, token: Token) -> bool {
        match self.entries.remove(&token) {
            Some(mut entry) => {
                if let Err(e) = self.poll.registry().deregister(entry.handler.source()) {
                    debug!(token = token.0, error = %e, "deregister failed");
                }
                true
            }
            None => false,
        }
    }

    /// Runs the loop until stopped or a fatal error occurs.
    ///
    /// Registered handles stay open when the loop exits; the stop request is
    /// consumed so the reactor can be run again.
    pub fn run(&mut self) -> Result<(), ReactorError> {
        info!(handles = self.entries.len(), "reactor running");

        let result = self.run_loop();
        self.shared.stop.store(false, Ordering::SeqCst);

        match &result {
            Ok(()) => info!(handles = self.entries.len(), "reactor stopped"),
            Err(e) => error!(error = %e, "reactor failed"),
        }
        result
    }

    fn run_loop(&mut self) -> Result<(), ReactorError> {
        let mut ready = Vec::new();
        let mut pending = Vec::new();

        loop {
            // Handlers submitted before the first poll are picked up here too.
            self.drain_inbox()?;

            if self.shared.stop.load(Ordering::SeqCst) {
                return Ok(());
            }

            let timeout = self.next_timeout(Instant::now());
            if let Err(e) = self.poll.poll(&mut self.events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ReactorError::Poll(e));
            }

            ready.clear();
            ready.extend(
                self.events
                    .iter()
                    .map(|event| (event.token(), Ready::from_event(event))),
            );

            for &(token, readiness) in &ready {
                if token == WAKER_TOKEN {
                    continue;
                }
                self.dispatch(token, readiness, &mut pending)?;
                for (handler, interest) in pending.drain(..) {
                    self.register(handler, interest)?;
                }
            }

            self.expire(Instant::now());
        }
    }

    fn dispatch(
        &mut self,
        token: Token,
        readiness: Ready,
        pending: &mut Pending,
    ) -> Result<(), ReactorError> {
        // Closed earlier in this pass.
        let Some(entry) = self.entries.get_mut(&token) else {
            return Ok(());
        };

        let mut ctx = Context {
            token,
            pending,
            shared: &self.shared,
        };
        let next = entry.handler.ready(&mut ctx, readiness)?;

        match next.interest() {
            None => {
                self.deregister(token);
            }
            Some(interest) if interest != entry.interest => {
                let result = self
                    .poll
                    .registry()
                    .reregister(entry.handler.source(), token, interest.into());
                match result {
                    Ok(()) => entry.interest = interest,
                    Err(e) => {
                        warn!(token = token.0, error = %e, "re-register failed, dropping handle");
                        self.deregister(token);
                    }
                }
            }
            Some(_) => {}
        }

        Ok(())
    }

    fn drain_inbox(&mut self) -> Result<(), ReactorError> {
        while let Some((handler, interest)) = self.shared.inbox.pop() {
            self.register(handler, interest)?;
        }
        Ok(())
    }

    fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.entries
            .values()
            .filter_map(|entry| entry.handler.deadline())
            .min()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    fn expire(&mut self, now: Instant) {
        let expired: Vec<Token> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.handler.deadline().is_some_and(|d| d <= now))
            .map(|(token, _)| *token)
            .collect();

        for token in expired {
            if let Some(entry) = self.entries.get_mut(&token) {
                entry.handler.timed_out();
            }
            self.deregister(token);
        }
    }

    fn allocate_token(&mut self) -> Token {
        loop {
            let token = Token(self.next_token);
            self.next_token = self.next_token.wrapping_add(1);
            if token != WAKER_TOKEN && !self.entries.contains_key(&token) {
                return token;
            }
        }
    }
}

fn register_error(e: io::Error) -> ReactorError {
    if is_resource_exhaustion(&e) {
        ReactorError::ResourceExhausted(e)
    } else {
        ReactorError::Register(e)
    }
}

/// `true` for errors meaning the process ran out of descriptors or memory.
pub(crate) fn is_resource_exhaustion(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(
            e.raw_os_error(),
            Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM | libc::ENOSPC)
        )
    }
    #[cfg(not(unix))]
    {
        e.kind() == io::ErrorKind::OutOfMemory
    }
}
