use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::SegQueue;
use mio::Waker;
use tracing::warn;

use super::{EventHandler, Interest};

/// State shared between a reactor and its handles.
pub(crate) struct Shared {
    pub(crate) stop: AtomicBool,
    pub(crate) inbox: SegQueue<(Box<dyn EventHandler>, Interest)>,
    waker: Waker,
}

impl Shared {
    pub(crate) fn new(waker: Waker) -> Self {
        Self {
            stop: AtomicBool::new(false),
            inbox: SegQueue::new(),
            waker,
        }
    }

    fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }
}

/// Cloneable, thread-safe control over a [`Reactor`](super::Reactor).
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Arc<Shared>,
}

impl ReactorHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Asks the reactor to return from `run` after its current pass.
    ///
    /// Idempotent. Open handles are left untouched. A stop requested while
    /// the reactor is not running makes its next `run` return immediately.
    pub fn stop(&self) {
        if !self.shared.stop.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.shared.wake() {
                warn!(error = %e, "failed to wake reactor for stop");
            }
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }

    /// Hands a handler to the reactor from any thread.
    ///
    /// The reactor registers it on its own thread during the next pass.
    pub fn submit(&self, handler: Box<dyn EventHandler>, interest: Interest) -> io::Result<()> {
        self.shared.inbox.push((handler, interest));
        self.shared.wake()
    }
}
