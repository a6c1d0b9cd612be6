//! eventhttp - Reactor-driven HTTP server
//!
//! Core library: a readiness-based reactor, an incremental HTTP/1.x parser
//! and a server routing requests by exact path.

pub mod config;
pub mod http;
pub mod reactor;
pub mod router;
pub mod server;

pub use http::request::{Method, Request};
pub use http::response::{Reply, ReplyError, Response, StatusCode};
pub use reactor::{EventHandler, Interest, Next, Reactor, ReactorError, ReactorHandle};
pub use router::{Handler, Router};
pub use server::{BindError, HttpServer, ServerError};
