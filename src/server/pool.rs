//! Worker reactors for the thread-per-core variant.
//!
//! Each worker runs its own [`Reactor`] on a dedicated thread and owns the
//! connections handed to it. Listeners stay on the dispatching reactor,
//! which distributes accepted sockets round-robin.
//!
//! Workers follow the dispatching reactor. They run while it runs and are
//! paused, connections left open, when it stops; their threads only exit
//! when the pool is dropped. A worker whose reactor fails leaves the
//! rotation and stops the dispatching reactor so the failure is reported
//! by `dispatch`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::reactor::{Reactor, ReactorError, ReactorHandle};
use crate::server::http_server::ServerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wanted {
    Pause,
    Run,
    Exit,
}

struct Phase {
    wanted: Wanted,
    /// The worker is inside `Reactor::run`.
    running: bool,
}

/// Run/pause handshake between the pool and one worker thread.
struct Control {
    phase: Mutex<Phase>,
    changed: Condvar,
    failed: AtomicBool,
}

impl Control {
    fn new() -> Self {
        Self {
            phase: Mutex::new(Phase {
                wanted: Wanted::Pause,
                running: false,
            }),
            changed: Condvar::new(),
            failed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Phase>) -> MutexGuard<'a, Phase> {
        self.changed
            .wait(guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set(&self, wanted: Wanted) {
        self.lock().wanted = wanted;
        self.changed.notify_all();
    }

    /// Blocks the worker while paused. Returns `false` once it should exit.
    fn wait_for_run(&self) -> bool {
        let mut phase = self.lock();
        while phase.wanted == Wanted::Pause {
            phase = self.wait(phase);
        }
        phase.running = phase.wanted == Wanted::Run;
        phase.running
    }

    fn left_run(&self, failed: bool) {
        if failed {
            self.failed.store(true, Ordering::SeqCst);
        }
        self.lock().running = false;
        self.changed.notify_all();
    }

    /// Blocks until the worker is outside its reactor loop.
    fn wait_until_idle(&self) {
        let mut phase = self.lock();
        while phase.running {
            phase = self.wait(phase);
        }
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

struct Slot {
    handle: ReactorHandle,
    control: Arc<Control>,
}

/// Handles of the live workers, shared with acceptors.
#[derive(Default)]
pub(crate) struct Workers {
    slots: Mutex<Vec<Slot>>,
    next: AtomicUsize,
}

impl Workers {
    /// Next healthy worker in round-robin order, or `None` when there is none.
    pub(crate) fn pick(&self) -> Option<ReactorHandle> {
        let slots = self.slots.lock().ok()?;
        let len = slots.len();

        (0..len).find_map(|_| {
            let slot = &slots[self.next.fetch_add(1, Ordering::Relaxed) % len];
            (!slot.control.is_failed()).then(|| slot.handle.clone())
        })
    }

    fn publish(&self, slots: Vec<Slot>) {
        match self.slots.lock() {
            Ok(mut current) => *current = slots,
            Err(poisoned) => *poisoned.into_inner() = slots,
        }
    }
}

struct Worker {
    id: usize,
    handle: ReactorHandle,
    control: Arc<Control>,
    thread: JoinHandle<Result<(), ReactorError>>,
}

impl Worker {
    fn spawn(id: usize, dispatcher: ReactorHandle) -> Result<Self, ServerError> {
        let reactor = Reactor::new()?;
        let handle = reactor.handle();
        let control = Arc::new(Control::new());

        let thread = {
            let control = Arc::clone(&control);
            thread::Builder::new()
                .name(format!("eventhttp-worker-{}", id))
                .spawn(move || work(reactor, &control, &dispatcher))
                .map_err(ServerError::Spawn)?
        };

        Ok(Self {
            id,
            handle,
            control,
            thread,
        })
    }

    fn join(self) -> Result<(), ServerError> {
        match self.thread.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ServerError::Reactor(e)),
            Err(_) => Err(ServerError::Worker(format!(
                "worker {} panicked",
                self.id
            ))),
        }
    }
}

fn work(
    mut reactor: Reactor,
    control: &Control,
    dispatcher: &ReactorHandle,
) -> Result<(), ReactorError> {
    while control.wait_for_run() {
        let result = reactor.run();
        control.left_run(result.is_err());

        if let Err(e) = result {
            dispatcher.stop();
            return Err(e);
        }
    }
    Ok(())
}

#[derive(Default)]
pub(crate) struct WorkerPool {
    shared: Arc<Workers>,
    workers: Vec<Worker>,
    spawned: usize,
}

impl WorkerPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn workers(&self) -> Arc<Workers> {
        Arc::clone(&self.shared)
    }

    /// Number of live worker threads.
    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    /// Spawns workers up to `count` and lets every one of them run.
    ///
    /// Failures of `dispatcher`'s workers stop `dispatcher`.
    pub(crate) fn resume(&mut self, count: usize, dispatcher: &ReactorHandle) -> Result<(), ServerError> {
        let mut result = Ok(());
        while self.workers.len() < count {
            match Worker::spawn(self.spawned, dispatcher.clone()) {
                Ok(worker) => {
                    self.spawned += 1;
                    self.workers.push(worker);
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.publish();
        result?;

        for worker in &self.workers {
            worker.control.set(Wanted::Run);
        }
        info!(workers = self.workers.len(), "worker reactors running");
        Ok(())
    }

    /// Stops every worker loop without touching its connections.
    ///
    /// Returns once no worker is running. Workers that failed are joined,
    /// removed, and the first failure is returned.
    pub(crate) fn pause(&mut self) -> Result<(), ServerError> {
        for worker in &self.workers {
            worker.control.set(Wanted::Pause);
            worker.handle.stop();
        }
        for worker in &self.workers {
            worker.control.wait_until_idle();
        }

        let (failed, healthy): (Vec<Worker>, Vec<Worker>) = std::mem::take(&mut self.workers)
            .into_iter()
            .partition(|worker| worker.control.is_failed());
        self.workers = healthy;
        self.publish();
        debug!(workers = self.workers.len(), "worker reactors paused");

        first_error(failed)
    }

    /// Ends every worker thread. Their connections are closed.
    pub(crate) fn shutdown(&mut self) -> Result<(), ServerError> {
        for worker in &self.workers {
            worker.control.set(Wanted::Exit);
            worker.handle.stop();
        }
        let workers = std::mem::take(&mut self.workers);
        self.publish();

        first_error(workers)
    }

    fn publish(&self) {
        let slots = self
            .workers
            .iter()
            .map(|worker| Slot {
                handle: worker.handle.clone(),
                control: Arc::clone(&worker.control),
            })
            .collect();
        self.shared.publish(slots);
    }
}

/// Joins `workers`, logging every failure and returning the first.
fn first_error(workers: Vec<Worker>) -> Result<(), ServerError> {
    let mut result = Ok(());
    for worker in workers {
        if let Err(e) = worker.join() {
            warn!(error = %e, "worker reactor failed");
            if result.is_ok() {
                result = Err(e);
            }
        }
    }
    result
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use mio::event::Source;
    use mio::net::UdpSocket;

    use super::*;
    use crate::reactor::{Context, EventHandler, Interest, Next, Ready};

    struct Failing(UdpSocket);

    impl EventHandler for Failing {
        fn source(&mut self) -> &mut dyn Source {
            &mut self.0
        }

        fn ready(&mut self, _ctx: &mut Context<'_>, _ready: Ready) -> Result<Next, ReactorError> {
            Err(ReactorError::ResourceExhausted(io::Error::other("out of descriptors")))
        }
    }

    #[test]
    fn pause_keeps_workers_for_the_next_run() {
        let dispatcher = Reactor::new().unwrap();
        let mut pool = WorkerPool::new();

        pool.resume(2, &dispatcher.handle()).unwrap();
        pool.pause().unwrap();
        assert_eq!(pool.len(), 2);
        assert!(pool.workers().pick().is_some());

        pool.resume(2, &dispatcher.handle()).unwrap();
        assert_eq!(pool.len(), 2);
        pool.shutdown().unwrap();
        assert!(pool.workers().pick().is_none());
    }

    #[test]
    fn failed_worker_leaves_rotation_and_stops_dispatcher() {
        let mut dispatcher = Reactor::new().unwrap();
        let mut pool = WorkerPool::new();
        pool.resume(1, &dispatcher.handle()).unwrap();
        let workers = pool.workers();

        let socket = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_addr().unwrap();
        workers
            .pick()
            .unwrap()
            .submit(Box::new(Failing(socket)), Interest::Read)
            .unwrap();
        std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .send_to(b"wake", addr)
            .unwrap();

        // Returns because the failing worker stopped it.
        dispatcher.run().unwrap();

        assert!(matches!(
            pool.pause(),
            Err(ServerError::Reactor(ReactorError::ResourceExhausted(_)))
        ));
        assert_eq!(pool.len(), 0);
        assert!(workers.pick().is_none());
    }
}
