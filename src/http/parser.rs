use bytes::{Buf, BytesMut};
use thiserror::Error;

use crate::http::headers::{is_token_byte, Headers};
use crate::http::request::{split_target, Method, Request, Version};
use crate::http::response::StatusCode;

/// Longest accepted chunk-size or chunk-terminator line.
const MAX_CHUNK_LINE: usize = 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequest,

    #[error("unknown request method")]
    InvalidMethod,

    #[error("unsupported protocol version")]
    InvalidVersion,

    #[error("malformed header line")]
    InvalidHeader,

    #[error("invalid Content-Length")]
    InvalidContentLength,

    #[error("malformed chunked body")]
    InvalidChunk,

    #[error("unsupported transfer coding")]
    UnsupportedTransferEncoding,

    #[error("request head exceeds {0} bytes")]
    HeadersTooLarge(usize),

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("incomplete request")]
    Incomplete,
}

impl ParseError {
    /// Status of the synthetic response sent back for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::InvalidVersion => StatusCode::VERSION_NOT_SUPPORTED,
            ParseError::UnsupportedTransferEncoding => StatusCode::NOT_IMPLEMENTED,
            ParseError::HeadersTooLarge(_) => StatusCode::HEADER_FIELDS_TOO_LARGE,
            ParseError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Size limits enforced while a request is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Request line plus header block, in bytes.
    pub max_headers_size: usize,
    /// Decoded body, in bytes.
    pub max_body_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_headers_size: 64 * 1024,
            max_body_size: 8 * 1024 * 1024,
        }
    }
}

/// Coarse position of the parser inside the request being framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RequestLine,
    Headers,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RequestLine,
    Headers,
    Body { remaining: usize },
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkEnd,
    Trailers,
}

#[derive(Debug)]
struct Head {
    method: Method,
    uri: String,
    path: String,
    query: Option<String>,
    version: Version,
    headers: Headers,
}

/// Incremental HTTP/1.x request parser.
///
/// Bytes are fed through a shared buffer; complete lines and body bytes are
/// consumed from it, partial data is left in place until more arrives. The
/// result is therefore independent of how the input was split across reads.
#[derive(Debug)]
pub struct RequestParser {
    state: State,
    limits: Limits,
    head_size: usize,
    head: Option<Head>,
    body: Vec<u8>,
}

impl RequestParser {
    pub fn new(limits: Limits) -> Self {
        Self {
            state: State::RequestLine,
            limits,
            head_size: 0,
            head: None,
            body: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::RequestLine => Phase::RequestLine,
            State::Headers => Phase::Headers,
            _ => Phase::Body,
        }
    }

    /// `true` between requests.
    ///
    /// Blank lines skipped before a request line still count against the
    /// header budget but do not start a request.
    pub fn is_idle(&self) -> bool {
        self.state == State::RequestLine && self.head.is_none()
    }

    /// Drops any partially framed request.
    pub fn reset(&mut self) {
        self.state = State::RequestLine;
        self.head_size = 0;
        self.head = None;
        self.body = Vec::new();
    }

    /// Advances the parser over `buf`.
    ///
    /// Returns `Ok(Some(request))` once a request is complete, leaving any
    /// following bytes in `buf`, and `Ok(None)` when more input is needed.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, ParseError> {
        loop {
            match self.state {
                State::RequestLine => {
                    let Some(line) = self.head_line(buf)? else {
                        return Ok(None);
                    };
                    // Stray CRLFs between requests are tolerated.
                    if line.is_empty() {
                        continue;
                    }
                    self.head = Some(parse_request_line(&line)?);
                    self.state = State::Headers;
                }

                State::Headers => {
                    let Some(line) = self.head_line(buf)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = self.body_state()?;
                        continue;
                    }
                    let head = self.head.as_mut().ok_or(ParseError::InvalidRequest)?;
                    parse_header_line(&line, &mut head.headers)?;
                }

                State::Body { remaining } => {
                    if remaining == 0 {
                        return self.finish().map(Some);
                    }
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let n = remaining.min(buf.len());
                    self.body.extend_from_slice(&buf[..n]);
                    buf.advance(n);
                    self.state = State::Body { remaining: remaining - n };
                }

                State::ChunkSize => {
                    let Some(line) = take_line(buf, MAX_CHUNK_LINE, ParseError::InvalidChunk)? else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&line)?;
                    if size == 0 {
                        self.state = State::Trailers;
                        continue;
                    }
                    if self.body.len().saturating_add(size) > self.limits.max_body_size {
                        return Err(ParseError::BodyTooLarge(self.limits.max_body_size));
                    }
                    self.state = State::ChunkData { remaining: size };
                }

                State::ChunkData { remaining } => {
                    if remaining == 0 {
                        self.state = State::ChunkEnd;
                        continue;
                    }
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let n = remaining.min(buf.len());
                    self.body.extend_from_slice(&buf[..n]);
                    buf.advance(n);
                    self.state = State::ChunkData { remaining: remaining - n };
                }

                State::ChunkEnd => {
                    let Some(line) = take_line(buf, MAX_CHUNK_LINE, ParseError::InvalidChunk)? else {
                        return Ok(None);
                    };
                    if !line.is_empty() {
                        return Err(ParseError::InvalidChunk);
                    }
                    self.state = State::ChunkSize;
                }

                // Trailer fields are read against the header budget and dropped.
                State::Trailers => {
                    let Some(line) = self.head_line(buf)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        return self.finish().map(Some);
                    }
                }
            }
        }
    }

    fn head_line(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>, ParseError> {
        let max = self.limits.max_headers_size;
        let budget = max.saturating_sub(self.head_size);
        let line = take_line(buf, budget, ParseError::HeadersTooLarge(max))?;

        if let Some(line) = &line {
            self.head_size += line_len_on_wire(line);
        }
        Ok(line)
    }

    fn body_state(&self) -> Result<State, ParseError> {
        let head = self.head.as_ref().ok_or(ParseError::InvalidRequest)?;
        let headers = &head.headers;

        let codings: Vec<String> = headers
            .get_all("Transfer-Encoding")
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        if !codings.is_empty() {
            return if codings.len() == 1 && codings[0] == "chunked" {
                Ok(State::ChunkSize)
            } else {
                Err(ParseError::UnsupportedTransferEncoding)
            };
        }

        let mut length: Option<usize> = None;
        for value in headers.get_all("Content-Length").flat_map(|v| v.split(',')) {
            let value = value.trim();
            // `parse` alone would also take a sign.
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseError::InvalidContentLength);
            }
            let parsed = value
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength)?;
            match length {
                Some(existing) if existing != parsed => {
                    return Err(ParseError::InvalidContentLength);
                }
                _ => length = Some(parsed),
            }
        }

        let length = length.unwrap_or(0);
        if length > self.limits.max_body_size {
            return Err(ParseError::BodyTooLarge(self.limits.max_body_size));
        }
        Ok(State::Body { remaining: length })
    }

    fn finish(&mut self) -> Result<Request, ParseError> {
        let head = self.head.take().ok_or(ParseError::InvalidRequest)?;
        let body = std::mem::take(&mut self.body);
        self.reset();

        Ok(Request {
            method: head.method,
            uri: head.uri,
            path: head.path,
            query: head.query,
            version: head.version,
            headers: head.headers,
            body,
            peer: None,
        })
    }
}

/// Parses one complete request from the start of `buf`.
///
/// Returns the request and the number of bytes it occupied, or
/// [`ParseError::Incomplete`] if `buf` ends before the request does.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let mut bytes = BytesMut::from(buf);
    let mut parser = RequestParser::new(Limits::default());

    match parser.parse(&mut bytes)? {
        Some(request) => Ok((request, buf.len() - bytes.len())),
        None => Err(ParseError::Incomplete),
    }
}

/// Splits the next LF-terminated line off `buf`, without its CRLF or LF.
fn take_line(
    buf: &mut BytesMut,
    max: usize,
    too_long: ParseError,
) -> Result<Option<BytesMut>, ParseError> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(end) if end < max => {
            let mut line = buf.split_to(end + 1);
            line.truncate(end);
            if line.last() == Some(&b'\r') {
                line.truncate(end - 1);
            }
            Ok(Some(line))
        }
        Some(_) => Err(too_long),
        None if buf.len() >= max => Err(too_long),
        None => Ok(None),
    }
}

// Stripped lines lose their terminator; count it as CRLF.
fn line_len_on_wire(line: &[u8]) -> usize {
    line.len() + 2
}

fn parse_request_line(line: &[u8]) -> Result<Head, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidRequest)?;
    let mut parts = line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let uri = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    let version = match Version::from_str(version_str) {
        Some(version) => version,
        None if version_str.starts_with("HTTP/") => return Err(ParseError::InvalidVersion),
        None => return Err(ParseError::InvalidRequest),
    };
    let (path, query) = split_target(uri).ok_or(ParseError::InvalidRequest)?;

    Ok(Head {
        method,
        uri: uri.to_string(),
        path,
        query,
        version,
        headers: Headers::new(),
    })
}

fn parse_header_line(line: &[u8], headers: &mut Headers) -> Result<(), ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidHeader)?;

    if line.starts_with([' ', '\t']) {
        return if headers.extend_last(line.trim()) {
            Ok(())
        } else {
            Err(ParseError::InvalidHeader)
        };
    }

    let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
    if key.is_empty() || !key.bytes().all(is_token_byte) {
        return Err(ParseError::InvalidHeader);
    }

    headers.append(key, value.trim());
    Ok(())
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk)?;
    let digits = line.split(';').next().unwrap_or("").trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidChunk);
    }
    usize::from_str_radix(digits, 16).map_err(|_| ParseError::InvalidChunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let (parsed, consumed) = parse_http_request(req).unwrap();

        assert_eq!(parsed.path, "/");
        assert_eq!(parsed.headers.get("Host").unwrap(), "example.com");
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn phases_follow_the_input() {
        let mut parser = RequestParser::new(Limits::default());
        let mut buf = BytesMut::from(&b"POST /x HTTP/1.1\r\n"[..]);

        assert!(parser.parse(&mut buf).unwrap().is_none());
        assert_eq!(parser.phase(), Phase::Headers);

        buf.extend_from_slice(b"Content-Length: 3\r\n\r\nab");
        assert!(parser.parse(&mut buf).unwrap().is_none());
        assert_eq!(parser.phase(), Phase::Body);

        buf.extend_from_slice(b"c");
        let request = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(request.body, b"abc");
        assert!(parser.is_idle());
    }

    #[test]
    fn line_over_budget_is_rejected_before_terminator() {
        let limits = Limits {
            max_headers_size: 16,
            max_body_size: 16,
        };
        let mut parser = RequestParser::new(limits);
        let mut buf = BytesMut::from(&b"GET /a-very-long-path-indeed"[..]);

        assert_eq!(
            parser.parse(&mut buf).unwrap_err(),
            ParseError::HeadersTooLarge(16)
        );
    }
}
