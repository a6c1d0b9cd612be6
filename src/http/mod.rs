//! HTTP/1.x protocol implementation.
//!
//! The HTTP layer is organized into several submodules:
//!
//! - **`connection`**: Per-socket state machine driven by the reactor
//! - **`headers`**: Ordered, case-insensitive header fields
//! - **`parser`**: Incremental request parser fed from a byte buffer
//! - **`request`**: Request representation, methods and versions
//! - **`response`**: Responses, status codes and the [`Reply`](response::Reply) handle
//! - **`writer`**: Serializes responses and writes them without blocking
//!
//! # Connection State Machine
//!
//! Each client connection goes through a state machine:
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Parse buffered bytes, read more on readiness
//!        └──────┬──────┘
//!               │ Request complete (or malformed → error response)
//!               ▼
//!        ┌──────────────────┐
//!        │    Dispatch      │ ← Router picks the handler, handler replies
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Flush until done or the socket blocks
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```
//!
//! The parser itself is a second, smaller machine (request line → headers →
//! body) that keeps its progress across reads, so a request may arrive in
//! any number of fragments.

pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
