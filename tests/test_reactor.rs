use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::net::{TcpListener, UdpSocket};

use eventhttp::reactor::{Context, EventHandler, Interest, Next, Reactor, ReactorError, Ready};

/// Accepts everything pending, then stops the reactor.
struct AcceptAndStop {
    listener: TcpListener,
    accepted: Arc<AtomicUsize>,
    next: Next,
}

impl AcceptAndStop {
    fn bind(next: Next) -> (Self, SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let handler = Self {
            listener,
            accepted: Arc::clone(&accepted),
            next,
        };
        (handler, addr, accepted)
    }
}

impl EventHandler for AcceptAndStop {
    fn source(&mut self) -> &mut dyn Source {
        &mut self.listener
    }

    fn ready(&mut self, ctx: &mut Context<'_>, _ready: Ready) -> Result<Next, ReactorError> {
        loop {
            match self.listener.accept() {
                Ok(_) => {
                    self.accepted.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(ReactorError::Poll(e)),
            }
        }
        if self.accepted.load(Ordering::SeqCst) > 0 {
            ctx.stop();
        }
        Ok(self.next)
    }
}

/// Never becomes ready; only its deadline matters.
struct Expiring {
    socket: UdpSocket,
    deadline: Instant,
    fired: Arc<AtomicBool>,
}

impl EventHandler for Expiring {
    fn source(&mut self) -> &mut dyn Source {
        &mut self.socket
    }

    fn ready(&mut self, _ctx: &mut Context<'_>, _ready: Ready) -> Result<Next, ReactorError> {
        Ok(Next::Read)
    }

    fn deadline(&self) -> Option<Instant> {
        Some(self.deadline)
    }

    fn timed_out(&mut self) {
        self.fired.store(true, Ordering::SeqCst);
    }
}

/// Fails on its first callback.
struct Failing {
    socket: UdpSocket,
}

impl EventHandler for Failing {
    fn source(&mut self) -> &mut dyn Source {
        &mut self.socket
    }

    fn ready(&mut self, _ctx: &mut Context<'_>, _ready: Ready) -> Result<Next, ReactorError> {
        Err(ReactorError::ResourceExhausted(io::Error::other("out of descriptors")))
    }
}

fn udp_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap()
}

fn stop_after(reactor: &Reactor, delay: Duration) -> thread::JoinHandle<()> {
    let handle = reactor.handle();
    thread::spawn(move || {
        thread::sleep(delay);
        handle.stop();
    })
}

#[test]
fn test_stop_from_another_thread() {
    let mut reactor = Reactor::new().unwrap();
    let stopper = stop_after(&reactor, Duration::from_millis(50));

    let started = Instant::now();
    reactor.run().unwrap();

    assert!(started.elapsed() >= Duration::from_millis(40));
    stopper.join().unwrap();
}

#[test]
fn test_stop_before_run_returns_immediately() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();

    handle.stop();
    handle.stop();
    assert!(handle.is_stopping());

    reactor.run().unwrap();
    // The request was consumed by the run it ended.
    assert!(!handle.is_stopping());
}

#[test]
fn test_stop_keeps_registered_handles() {
    let mut reactor = Reactor::new().unwrap();
    let (handler, _addr, _) = AcceptAndStop::bind(Next::Read);
    reactor.register(Box::new(handler), Interest::Read).unwrap();

    reactor.stop();
    reactor.run().unwrap();
    assert_eq!(reactor.len(), 1);
}

#[test]
fn test_callback_can_stop_the_loop() {
    let mut reactor = Reactor::new().unwrap();
    let (handler, addr, accepted) = AcceptAndStop::bind(Next::Read);
    reactor.register(Box::new(handler), Interest::Read).unwrap();

    let _client = TcpStream::connect(addr).unwrap();
    reactor.run().unwrap();

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(reactor.len(), 1);
}

#[test]
fn test_close_deregisters_handler() {
    let mut reactor = Reactor::new().unwrap();
    let (handler, addr, _) = AcceptAndStop::bind(Next::Close);
    let token = reactor.register(Box::new(handler), Interest::Read).unwrap();

    let _client = TcpStream::connect(addr).unwrap();
    reactor.run().unwrap();

    assert!(reactor.is_empty());
    assert!(!reactor.deregister(token));
}

#[test]
fn test_deregister_by_token() {
    let mut reactor = Reactor::new().unwrap();
    let token = reactor
        .register(Box::new(Failing { socket: udp_socket() }), Interest::Read)
        .unwrap();

    assert!(reactor.deregister(token));
    assert!(reactor.is_empty());
}

#[test]
fn test_submit_from_another_thread() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let (handler, addr, accepted) = AcceptAndStop::bind(Next::Read);

    let submitter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.submit(Box::new(handler), Interest::Read).unwrap();
        TcpStream::connect(addr).unwrap()
    });

    reactor.run().unwrap();
    let _client = submitter.join().unwrap();

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(reactor.len(), 1);
}

#[test]
fn test_deadline_expires_handler() {
    let mut reactor = Reactor::new().unwrap();
    let fired = Arc::new(AtomicBool::new(false));
    reactor
        .register(
            Box::new(Expiring {
                socket: udp_socket(),
                deadline: Instant::now() + Duration::from_millis(30),
                fired: Arc::clone(&fired),
            }),
            Interest::Read,
        )
        .unwrap();

    let stopper = stop_after(&reactor, Duration::from_millis(300));
    reactor.run().unwrap();
    stopper.join().unwrap();

    assert!(fired.load(Ordering::SeqCst));
    assert!(reactor.is_empty());
}

#[test]
fn test_handler_error_ends_run() {
    let mut reactor = Reactor::new().unwrap();
    let socket = udp_socket();
    let addr = socket.local_addr().unwrap();
    reactor
        .register(Box::new(Failing { socket }), Interest::Read)
        .unwrap();

    let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(b"wake", addr).unwrap();

    let result = reactor.run();
    assert!(matches!(result, Err(ReactorError::ResourceExhausted(_))));
}
