//! HTTP/1.1 Message Types
//!
//! This module defines the request and response types used on the wire.
//! Only the subset the server speaks is modelled: `GET` and `POST`
//! requests with `Content-Length` framed bodies, and responses built from
//! a fixed status table.
//!
//! ## Response Layout
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Connection: keep-alive\r\n
//! Keep-Alive: max=6, timeout=60\r\n
//! Content-Type: text/html\r\n
//! Content-Length: 1234\r\n
//! \r\n
//! <body bytes>
//! ```
//!
//! The header block is written into the connection's write buffer; the body
//! is carried separately as `Bytes` so file contents are never copied.

use crate::buffer::ByteBuffer;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;

/// The line terminator used throughout HTTP/1.1.
pub const CRLF: &[u8] = b"\r\n";

/// Document served for `/`.
pub const DEFAULT_DOCUMENT: &str = "/index.html";

/// Extensionless routes that get `.html` appended.
pub const HTML_ROUTES: &[&str] = &["/index", "/register", "/login", "/welcome", "/video", "/picture"];

/// Requests answered on one keep-alive connection before it is closed.
pub const KEEP_ALIVE_MAX: u32 = 6;

/// Request methods the server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Parses a method token. Matching is case-sensitive, as in RFC 9110.
    ///
    /// # Example
    /// ```
    /// use miniserver::protocol::Method;
    /// assert_eq!(Method::from_token("GET"), Some(Method::Get));
    /// assert_eq!(Method::from_token("get"), None);
    /// ```
    pub fn from_token(token: &str) -> Option<Method> {
        match token {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Normalized request target (see [`normalize_path`]).
    pub path: String,
    /// Protocol version without the `HTTP/` prefix, e.g. `"1.1"`.
    pub version: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Request {
    /// Looks up a header by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_lookup(&self.headers, name)
    }

    /// Keep-alive requires `Connection: keep-alive` and HTTP/1.1.
    pub fn is_keep_alive(&self) -> bool {
        keep_alive_requested(&self.headers, &self.version)
    }
}

pub(crate) fn header_lookup<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    if let Some(value) = headers.get(name) {
        return Some(value.as_str());
    }
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

pub(crate) fn keep_alive_requested(headers: &HashMap<String, String>, version: &str) -> bool {
    version == "1.1"
        && header_lookup(headers, "Connection")
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("keep-alive"))
}

/// Maps `/` to the default document and known routes to their `.html` file.
///
/// # Example
/// ```
/// use miniserver::protocol::types::normalize_path;
/// assert_eq!(normalize_path("/"), "/index.html");
/// assert_eq!(normalize_path("/login"), "/login.html");
/// assert_eq!(normalize_path("/style.css"), "/style.css");
/// ```
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return DEFAULT_DOCUMENT.to_string();
    }
    if HTML_ROUTES.contains(&path) {
        return format!("{}.html", path);
    }
    path.to_string()
}

/// Response status codes the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    InternalServerError,
    ServiceUnavailable,
}

impl StatusCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::InternalServerError => 500,
            StatusCode::ServiceUnavailable => 503,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// Human-readable explanation used in generated error bodies.
    pub fn message(&self) -> &'static str {
        match self {
            StatusCode::Ok => "",
            StatusCode::BadRequest => "Your request has bad syntax or is inherently impossible to satisfy.",
            StatusCode::Forbidden => "You do not have permission to get this file from the server.",
            StatusCode::NotFound => "The requested file was not found on this server.",
            StatusCode::InternalServerError => "There was an unusual problem serving the request file.",
            StatusCode::ServiceUnavailable => "Server Busy!",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

/// Looks up the `Content-Type` for a path by its extension.
///
/// No extension means `text/plain`; an unknown one means
/// `application/octet-stream`.
pub fn mime_type(path: &str) -> &'static str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return "text/plain";
    };

    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "xml" => "text/xml",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/x-gzip",
        "tar" => "application/x-tar",
        "bin" => "application/octet-stream",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "mpg" | "mpeg" => "video/mpeg",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

/// Status line plus the headers the server always sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub keep_alive: bool,
    /// Advertised in `Keep-Alive: timeout=`; omitted when idle eviction is off.
    pub keep_alive_timeout_secs: Option<u64>,
    pub content_type: &'static str,
    pub content_length: usize,
}

impl ResponseHead {
    /// Writes the status line and header block, including the blank line.
    pub fn write_to(&self, buf: &mut ByteBuffer) {
        buf.append(format!("HTTP/1.1 {}\r\n", self.status).as_bytes());

        if self.keep_alive {
            buf.append(b"Connection: keep-alive\r\n");
            match self.keep_alive_timeout_secs {
                Some(secs) => buf.append(
                    format!("Keep-Alive: max={}, timeout={}\r\n", KEEP_ALIVE_MAX, secs).as_bytes(),
                ),
                None => buf.append(format!("Keep-Alive: max={}\r\n", KEEP_ALIVE_MAX).as_bytes()),
            }
        } else {
            buf.append(b"Connection: close\r\n");
        }

        buf.append(format!("Content-Type: {}\r\n", self.content_type).as_bytes());
        buf.append(format!("Content-Length: {}\r\n", self.content_length).as_bytes());
        buf.append(CRLF);
    }
}

/// A response ready to be queued on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub head: ResponseHead,
    pub body: Bytes,
}

impl Response {
    /// Builds a response whose `Content-Length` matches `body`.
    pub fn new(
        status: StatusCode,
        content_type: &'static str,
        body: Bytes,
        keep_alive: bool,
        keep_alive_timeout_secs: Option<u64>,
    ) -> Self {
        Self {
            head: ResponseHead {
                status,
                keep_alive,
                keep_alive_timeout_secs,
                content_type,
                content_length: body.len(),
            },
            body,
        }
    }

    /// Inline HTML body for an error status, used when no error page exists.
    pub fn error_body(status: StatusCode) -> Bytes {
        Bytes::from(format!(
            "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {}\n<p>{}</p><hr><em>miniserver</em></body></html>",
            status.as_u16(),
            status.reason(),
            status.message()
        ))
    }

    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    pub fn is_keep_alive(&self) -> bool {
        self.head.keep_alive
    }
}
