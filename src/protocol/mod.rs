//! HTTP/1.1 Protocol Implementation
//!
//! The subset of HTTP/1.1 the server speaks: `GET` and `POST` requests,
//! `Content-Length` framed bodies and keep-alive via
//! `Connection: keep-alive` on HTTP/1.1.
//!
//! ## Modules
//!
//! - `types`: `Method`, `Request`, `StatusCode`, response head serialization
//!   and the MIME table
//! - `parser`: incremental request state machine over a `ByteBuffer`
//!
//! ## Example
//!
//! ```
//! use miniserver::buffer::ByteBuffer;
//! use miniserver::protocol::{Progress, RequestParser, StatusCode};
//!
//! let mut buf = ByteBuffer::new();
//! buf.append(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
//!
//! let mut parser = RequestParser::new();
//! assert_eq!(parser.parse(&mut buf).unwrap(), Progress::Complete);
//!
//! let request = parser.take_request().unwrap();
//! assert_eq!(request.path, "/index.html");
//! assert!(request.is_keep_alive());
//! assert_eq!(StatusCode::Ok.to_string(), "200 OK");
//! ```

pub mod parser;
pub mod types;

pub use parser::{escape_for_log, ParseError, ParseState, Progress, RequestParser};
pub use types::{mime_type, Method, Request, Response, ResponseHead, StatusCode};
