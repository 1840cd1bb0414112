//! Incremental HTTP/1.1 Request Parser
//!
//! The parser consumes bytes from a [`ByteBuffer`] as they become complete
//! and keeps its position across calls, so a request split over any number
//! of TCP segments parses the same as one delivered in a single read.
//!
//! ## State Machine
//!
//! ```text
//!   ┌──────┐  request line  ┌─────────┐  blank line (GET)   ┌──────┐
//!   │ Line │ ─────────────▶ │ Headers │ ──────────────────▶ │ Done │
//!   └──────┘                └────┬────┘                     └──────┘
//!                                │ blank line (POST)           ▲
//!                                ▼                             │
//!                           ┌─────────┐  Content-Length bytes  │
//!                           │  Body   │ ───────────────────────┘
//!                           └─────────┘
//! ```
//!
//! A line is only consumed once its CRLF has arrived. Anything short of
//! that reports [`Progress::NeedMoreData`] and leaves the buffer untouched.

use crate::buffer::ByteBuffer;
use crate::protocol::types::{header_lookup, keep_alive_requested, normalize_path, Method, Request};
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;

/// Reasons a request is rejected as malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Request line is not `METHOD SP PATH SP HTTP/VERSION`
    #[error("malformed request line")]
    MalformedRequestLine,

    /// Header line without a `:` separator
    #[error("malformed header line")]
    MalformedHeader,

    /// Method other than GET or POST
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// POST body without a Content-Length header
    #[error("missing Content-Length")]
    MissingContentLength,

    /// Content-Length that is not a non-negative integer
    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),

    /// Request line or header is not valid UTF-8
    #[error("invalid UTF-8 in request head")]
    InvalidUtf8,
}

/// Where the parser currently is inside a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Line,
    Headers,
    Body,
    Done,
}

/// Outcome of a successful [`RequestParser::parse`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A whole request is available.
    Complete,
    /// The buffer ends mid-request; read more and call again.
    NeedMoreData,
}

/// Incremental request parser. One per connection, reset between requests.
///
/// # Example
///
/// ```
/// use miniserver::buffer::ByteBuffer;
/// use miniserver::protocol::{Progress, RequestParser};
///
/// let mut buf = ByteBuffer::new();
/// let mut parser = RequestParser::new();
///
/// buf.append(b"GET /login HTTP/1.1\r\nHost: x\r\n");
/// assert_eq!(parser.parse(&mut buf).unwrap(), Progress::NeedMoreData);
///
/// buf.append(b"\r\n");
/// assert_eq!(parser.parse(&mut buf).unwrap(), Progress::Complete);
/// assert_eq!(parser.path(), "/login.html");
/// ```
#[derive(Debug, Clone)]
pub struct RequestParser {
    state: ParseState,
    method: String,
    path: String,
    version: String,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::Line,
            method: String::new(),
            path: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    /// Clears every field so the next pipelined request starts fresh.
    pub fn reset(&mut self) {
        self.state = ParseState::Line;
        self.method.clear();
        self.path.clear();
        self.version.clear();
        self.headers.clear();
        self.body = Bytes::new();
    }

    /// Advances the state machine over whatever `buf` holds.
    ///
    /// Consumed bytes are retrieved from `buf`; bytes belonging to a later
    /// pipelined request are left in place.
    pub fn parse(&mut self, buf: &mut ByteBuffer) -> Result<Progress, ParseError> {
        loop {
            match self.state {
                ParseState::Line => {
                    let Some(pos) = buf.find_crlf() else {
                        return Ok(Progress::NeedMoreData);
                    };
                    self.parse_request_line(&buf.peek()[..pos])?;
                    buf.retrieve(pos + 2);
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let Some(pos) = buf.find_crlf() else {
                        return Ok(Progress::NeedMoreData);
                    };
                    if pos == 0 {
                        buf.retrieve(2);
                        self.state = match self.method()? {
                            Method::Get => ParseState::Done,
                            Method::Post => ParseState::Body,
                        };
                    } else {
                        self.parse_header(&buf.peek()[..pos])?;
                        buf.retrieve(pos + 2);
                    }
                }
                ParseState::Body => {
                    let len = self.content_length()?;
                    if buf.readable_bytes() < len {
                        return Ok(Progress::NeedMoreData);
                    }
                    self.body = Bytes::copy_from_slice(&buf.peek()[..len]);
                    buf.retrieve(len);
                    self.state = ParseState::Done;
                }
                ParseState::Done => return Ok(Progress::Complete),
            }
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Done
    }

    /// The method token as received (may be unsupported before headers end).
    pub fn method_token(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_lookup(&self.headers, name)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_keep_alive(&self) -> bool {
        keep_alive_requested(&self.headers, &self.version)
    }

    /// Moves the finished request out, leaving the parser reset.
    ///
    /// Returns `None` unless the last `parse` reported `Complete`.
    pub fn take_request(&mut self) -> Option<Request> {
        if self.state != ParseState::Done {
            return None;
        }
        let method = Method::from_token(&self.method)?;
        let request = Request {
            method,
            path: std::mem::take(&mut self.path),
            version: std::mem::take(&mut self.version),
            headers: std::mem::take(&mut self.headers),
            body: std::mem::take(&mut self.body),
        };
        self.reset();
        Some(request)
    }

    fn method(&self) -> Result<Method, ParseError> {
        Method::from_token(&self.method).ok_or_else(|| ParseError::UnsupportedMethod(self.method.clone()))
    }

    /// Matches `^([^ ]*) ([^ ]*) HTTP/([^ ]*)$`.
    fn parse_request_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;

        let mut parts = line.splitn(3, ' ');
        let (Some(method), Some(path), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ParseError::MalformedRequestLine);
        };
        let version = rest
            .strip_prefix("HTTP/")
            .ok_or(ParseError::MalformedRequestLine)?;
        if version.contains(' ') {
            return Err(ParseError::MalformedRequestLine);
        }

        self.method = method.to_string();
        self.path = normalize_path(path);
        self.version = version.to_string();
        Ok(())
    }

    /// Matches `^([^:]*): ?(.*)$`; a repeated key keeps the last value,
    /// whatever the case of either spelling.
    fn parse_header(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;
        let (key, value) = line.split_once(':').ok_or(ParseError::MalformedHeader)?;
        let value = value.strip_prefix(' ').unwrap_or(value);
        self.headers.retain(|existing, _| !existing.eq_ignore_ascii_case(key));
        self.headers.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn content_length(&self) -> Result<usize, ParseError> {
        let raw = self
            .header("Content-Length")
            .ok_or(ParseError::MissingContentLength)?;
        raw.trim()
            .parse::<usize>()
            .map_err(|_| ParseError::InvalidContentLength(raw.to_string()))
    }
}

/// Renders control characters visibly so a request line can be logged on
/// one line.
///
/// # Example
/// ```
/// use miniserver::protocol::escape_for_log;
/// assert_eq!(escape_for_log(b"GET /\r\n"), "GET /\\r\\n");
/// ```
pub fn escape_for_log(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            match c {
                '\r' => out.push_str("\\r"),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\\' => out.push_str("\\\\"),
                '\0' => out.push_str("\\0"),
                c => out.push(c),
            }
        }
        for b in chunk.invalid() {
            out.push_str(&format!("\\x{:02x}", b));
        }
    }
    out
}
