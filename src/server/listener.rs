use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::info;

use crate::reactor::is_resource_exhaustion;

pub const DEFAULT_BACKLOG: i32 = 1024;

#[derive(Debug, Error)]
pub enum BindError {
    #[error("address {0} is already in use")]
    AddressInUse(String),

    #[error("permission denied binding {0}")]
    PermissionDenied(String),

    #[error("invalid address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("failed to bind {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl BindError {
    fn from_io(addr: String, e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::AddrInUse => BindError::AddressInUse(addr),
            io::ErrorKind::PermissionDenied => BindError::PermissionDenied(addr),
            io::ErrorKind::AddrNotAvailable | io::ErrorKind::InvalidInput => {
                BindError::InvalidAddress {
                    addr,
                    reason: e.to_string(),
                }
            }
            _ => BindError::Io { addr, source: e },
        }
    }
}

#[derive(Debug, Error)]
pub enum AcceptError {
    /// Out of descriptors or memory; the server cannot keep accepting.
    #[error("accept failed, resources exhausted: {0}")]
    ResourceExhausted(#[source] io::Error),

    /// The pending connection went away; accepting can continue.
    #[error("accept aborted: {0}")]
    Aborted(#[source] io::Error),
}

/// A bound, listening, non-blocking socket.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    backlog: i32,
}

impl Listener {
    /// Binds `host:port` and starts listening with `backlog` pending slots.
    ///
    /// The host may be a literal address or a name; the first resolved
    /// address is used. Port 0 asks the OS for a free port.
    pub fn bind(host: &str, port: u16, backlog: i32) -> Result<Self, BindError> {
        let display = format!("{}:{}", host, port);

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| BindError::InvalidAddress {
                addr: display.clone(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| BindError::InvalidAddress {
                addr: display.clone(),
                reason: "host resolved to no addresses".to_string(),
            })?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| BindError::from_io(display.clone(), e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| BindError::from_io(display.clone(), e))?;
        socket
            .bind(&addr.into())
            .map_err(|e| BindError::from_io(display.clone(), e))?;
        socket
            .listen(backlog)
            .map_err(|e| BindError::from_io(display.clone(), e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| BindError::from_io(display.clone(), e))?;

        let std_listener: std::net::TcpListener = socket.into();
        let local_addr = std_listener
            .local_addr()
            .map_err(|e| BindError::from_io(display.clone(), e))?;

        info!(addr = %local_addr, backlog, "listening");

        Ok(Self {
            inner: TcpListener::from_std(std_listener),
            local_addr,
            backlog,
        })
    }

    /// Accepts one pending connection without blocking.
    ///
    /// `Ok(None)` means no connection is pending.
    pub fn accept(&self) -> Result<Option<(TcpStream, SocketAddr)>, AcceptError> {
        loop {
            match self.inner.accept() {
                Ok(accepted) => return Ok(Some(accepted)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_resource_exhaustion(&e) => {
                    return Err(AcceptError::ResourceExhausted(e));
                }
                Err(e) => return Err(AcceptError::Aborted(e)),
            }
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn backlog(&self) -> i32 {
        self.backlog
    }

    pub(crate) fn source_mut(&mut self) -> &mut TcpListener {
        &mut self.inner
    }
}
