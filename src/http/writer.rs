use std::io::{self, Write};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::http::headers::is_valid_field;
use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

/// What the `Connection` header of a serialized response should say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHeader {
    /// Leave whatever the response carries.
    Unchanged,
    KeepAlive,
    Close,
}

fn serialize_response(resp: &Response, head_only: bool, connection: ConnectionHeader) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + resp.body.len());

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.put_slice(status_line.as_bytes());

    // Headers
    let override_connection = connection != ConnectionHeader::Unchanged;
    for (k, v) in resp.headers.iter() {
        if override_connection && k.eq_ignore_ascii_case("Connection") {
            continue;
        }
        if !resp.status.allows_body() && k.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        // A CR or LF here would split the response.
        if !is_valid_field(k, v) {
            warn!(header = %k.escape_debug(), "dropping unwritable response header");
            continue;
        }
        put_header(&mut buf, k, v);
    }
    match connection {
        ConnectionHeader::KeepAlive => put_header(&mut buf, "Connection", "keep-alive"),
        ConnectionHeader::Close => put_header(&mut buf, "Connection", "close"),
        ConnectionHeader::Unchanged => {}
    }

    // Header/body separator
    buf.put_slice(b"\r\n");

    if !head_only && resp.status.allows_body() {
        buf.put_slice(&resp.body);
    }

    buf.freeze()
}

fn put_header(buf: &mut BytesMut, key: &str, value: &str) {
    buf.put_slice(key.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(b"\r\n");
}

/// A serialized response being flushed to a non-blocking socket.
#[derive(Debug)]
pub struct ResponseWriter {
    buffer: Bytes,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self::with_options(response, false, ConnectionHeader::Unchanged)
    }

    /// Serializes `response`, dropping the body for HEAD requests and
    /// forcing the `Connection` header when asked to.
    pub fn with_options(response: &Response, head_only: bool, connection: ConnectionHeader) -> Self {
        Self {
            buffer: serialize_response(response, head_only, connection),
            written: 0,
        }
    }

    /// Writes as much as the stream accepts.
    ///
    /// Returns `Ok(true)` once everything is written and `Ok(false)` when the
    /// stream would block with bytes still pending.
    pub fn write_to<W: Write>(&mut self, stream: &mut W) -> io::Result<bool> {
        while self.written < self.buffer.len() {
            match stream.write(&self.buffer[self.written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection closed while writing",
                    ));
                }
                Ok(n) => self.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(true)
    }

    pub fn is_done(&self) -> bool {
        self.written == self.buffer.len()
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.written
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}
