//! Listening sockets and the server that ties them to the reactor.
//!
//! An [`HttpServer`] owns any number of [`Listener`]s. Once dispatched, each
//! listener is driven by an acceptor on the main reactor; accepted sockets
//! become connections either on that same reactor or on one of the worker
//! reactors.

pub(crate) mod acceptor;
pub mod http_server;
pub mod listener;
pub(crate) mod pool;

pub use http_server::{HttpServer, ServerError};
pub use listener::{BindError, Listener};
