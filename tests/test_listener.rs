use std::io::Write;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use eventhttp::server::listener::{BindError, DEFAULT_BACKLOG, Listener};

#[test]
fn test_bind_ephemeral_port() {
    let listener = Listener::bind("127.0.0.1", 0, DEFAULT_BACKLOG).unwrap();

    assert_ne!(listener.local_addr().port(), 0);
    assert!(listener.local_addr().ip().is_loopback());
    assert_eq!(listener.backlog(), DEFAULT_BACKLOG);
}

#[test]
fn test_bind_same_address_twice_fails() {
    let first = Listener::bind("127.0.0.1", 0, DEFAULT_BACKLOG).unwrap();
    let port = first.local_addr().port();

    let second = Listener::bind("127.0.0.1", port, DEFAULT_BACKLOG);
    assert!(matches!(second, Err(BindError::AddressInUse(_))));

    // The failed bind leaves the first listener usable.
    let mut client = TcpStream::connect(first.local_addr()).unwrap();
    client.write_all(b"ping").unwrap();
    let accepted = wait_for_accept(&first);
    assert!(accepted);
}

#[test]
fn test_bind_independent_listeners() {
    let a = Listener::bind("127.0.0.1", 0, 16).unwrap();
    let b = Listener::bind("127.0.0.1", 0, 16).unwrap();

    assert_ne!(a.local_addr(), b.local_addr());
}

#[test]
fn test_bind_invalid_host() {
    let result = Listener::bind("not a host name", 8088, DEFAULT_BACKLOG);

    assert!(matches!(result, Err(BindError::InvalidAddress { .. })));
}

#[test]
fn test_accept_without_pending_connection() {
    let listener = Listener::bind("127.0.0.1", 0, DEFAULT_BACKLOG).unwrap();

    assert!(listener.accept().unwrap().is_none());
}

fn wait_for_accept(listener: &Listener) -> bool {
    for _ in 0..100 {
        if let Ok(Some((_stream, peer))) = listener.accept() {
            return peer.ip().is_loopback();
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}
