use std::fmt;

use thiserror::Error;

use crate::http::headers::{is_valid_field, Headers};

/// An HTTP status code.
///
/// Handlers may reply with any code in `100..=999`; the common ones are
/// available as associated constants.
///
/// # Example
///
/// ```
/// # use eventhttp::http::response::StatusCode;
/// assert_eq!(StatusCode::OK.as_u16(), 200);
/// assert_eq!(StatusCode::NOT_FOUND.reason_phrase(), "Not Found");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const HEADER_FIELDS_TOO_LARGE: StatusCode = StatusCode(431);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);
    pub const VERSION_NOT_SUPPORTED: StatusCode = StatusCode(505);

    /// Creates a status code from its numeric value.
    ///
    /// Returns `None` outside the three-digit range.
    pub fn from_u16(code: u16) -> Option<Self> {
        (100..=999).contains(&code).then_some(StatusCode(code))
    }

    /// Returns the numeric HTTP status code.
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns the standard HTTP reason phrase for this status code.
    ///
    /// Unknown codes fall back to a phrase describing their class.
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            409 => "Conflict",
            411 => "Length Required",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            100..=199 => "Informational",
            200..=299 => "Success",
            300..=399 => "Redirection",
            400..=499 => "Client Error",
            _ => "Server Error",
        }
    }

    /// Informational and 204/304 responses never carry a body.
    pub fn allows_body(&self) -> bool {
        !(self.0 < 200 || self.0 == 204 || self.0 == 304)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

/// Represents a complete HTTP response ready to be sent to a client.
///
/// Contains the HTTP status code, headers, and response body.
#[derive(Debug, Clone)]
pub struct Response {
    /// The HTTP status code
    pub status: StatusCode,
    /// HTTP headers in the order they will be written
    pub headers: Headers,
    /// Response body as bytes
    pub body: Vec<u8>,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(b"{}".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Adds or replaces a header.
    ///
    /// # Arguments
    ///
    /// * `key` - Header name (case-insensitive in HTTP)
    /// * `value` - Header value
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Merges a whole header block, replacing fields with the same name.
    pub fn headers(mut self, headers: &Headers) -> Self {
        for (k, v) in headers.iter() {
            self.headers.insert(k, v);
        }
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Builds the final Response.
    ///
    /// Automatically adds the Content-Length header based on body size if not already present.
    pub fn build(mut self) -> Response {
        if !self.headers.contains_key("Content-Length") {
            self.headers
                .insert("Content-Length", self.body.len().to_string());
        }

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        ResponseBuilder::new(StatusCode::OK)
            .body(body.into())
            .build()
    }

    /// Creates a 404 Not Found response.
    pub fn not_found() -> Self {
        Self::error(StatusCode::NOT_FOUND)
    }

    /// Creates a 500 Internal Server Error response.
    pub fn internal_error() -> Self {
        Self::error(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Creates a plain-text error response whose body repeats the status line,
    /// e.g. `404 Not Found`.
    pub fn error(status: StatusCode) -> Self {
        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain")
            .body(status.to_string().into_bytes())
            .build()
    }

    /// `true` when the response asks for the connection to be closed.
    pub fn wants_close(&self) -> bool {
        self.headers.has_token("Connection", "close")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplyError {
    #[error("a {0} reply was already sent on this request")]
    AlreadySent(StatusCode),

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    /// The name is not a token, or the value contains CR, LF or NUL.
    #[error("invalid header field {0:?}")]
    InvalidHeader(String),
}

/// The reply handle passed to a handler alongside its request.
///
/// A reply can be sent exactly once. Every later attempt fails with
/// [`ReplyError::AlreadySent`] and leaves the first reply untouched.
#[derive(Debug, Default)]
pub struct Reply {
    headers: Headers,
    response: Option<Response>,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages an output header for the reply that is about to be sent.
    pub fn add_header(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ReplyError> {
        self.ensure_unsent()?;
        let (key, value) = (key.into(), value.into());
        if !is_valid_field(&key, &value) {
            return Err(ReplyError::InvalidHeader(key));
        }
        self.headers.append(key, value);
        Ok(())
    }

    /// Sends `status` with `body`, plus any staged headers.
    ///
    /// # Example
    ///
    /// ```
    /// # use eventhttp::http::response::Reply;
    /// let mut reply = Reply::new();
    /// assert!(reply.reply(200, "OK").is_ok());
    /// assert!(reply.reply(500, "again").is_err());
    /// ```
    pub fn reply(&mut self, status: u16, body: impl Into<Vec<u8>>) -> Result<(), ReplyError> {
        self.ensure_unsent()?;
        let status = StatusCode::from_u16(status).ok_or(ReplyError::InvalidStatus(status))?;

        let response = ResponseBuilder::new(status)
            .headers(&self.headers)
            .body(body.into())
            .build();
        self.response = Some(response);
        Ok(())
    }

    /// Sends a fully built response. Staged headers are merged in unless
    /// the response already sets them.
    ///
    /// A response carrying a field that cannot be written as one header line
    /// is refused and nothing is sent.
    pub fn send(&mut self, mut response: Response) -> Result<(), ReplyError> {
        self.ensure_unsent()?;
        if let Some((k, _)) = response.headers.iter().find(|(k, v)| !is_valid_field(k, v)) {
            return Err(ReplyError::InvalidHeader(k.to_string()));
        }

        for (k, v) in self.headers.iter() {
            if !response.headers.contains_key(k) {
                response.headers.append(k, v);
            }
        }
        self.response = Some(response);
        Ok(())
    }

    pub fn is_sent(&self) -> bool {
        self.response.is_some()
    }

    /// The reply that was sent, if any.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub(crate) fn into_response(self) -> Option<Response> {
        self.response
    }

    fn ensure_unsent(&self) -> Result<(), ReplyError> {
        match &self.response {
            Some(sent) => Err(ReplyError::AlreadySent(sent.status)),
            None => Ok(()),
        }
    }
}
