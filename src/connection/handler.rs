//! Connection Handler Module
//!
//! One [`Connection`] per accepted socket. The owning worker calls into it
//! whenever the poller reports readiness and re-arms the socket according
//! to the [`Next`] value it gets back.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Drained from the worker's inbox, registered for READABLE
//!        │
//!        ▼
//! 2. ┌──────────────────────────────────────┐
//!    │  readable                            │
//!    │  ┌────────────────────────────────┐  │
//!    │  │ read(): readv until WouldBlock │  │
//!    │  └───────────────┬────────────────┘  │
//!    │                  ▼                   │
//!    │  ┌────────────────────────────────┐  │
//!    │  │ process(): parse, respond      │──┼──▶ NeedMoreData: Next::Read
//!    │  └───────────────┬────────────────┘  │
//!    │                  ▼ Next::Write       │
//!    │  writable                            │
//!    │  ┌────────────────────────────────┐  │
//!    │  │ write(): writev head + body    │──┼──▶ WouldBlock: Next::Write
//!    │  └───────────────┬────────────────┘  │
//!    │                  ▼                   │
//!    │   keep-alive? reset parser, loop     │
//!    └──────────────────┬───────────────────┘
//!                       ▼ no
//! 3. Next::Close: worker deregisters, cancels the timer, drops it
//! ```
//!
//! ## Buffer Management
//!
//! The read buffer keeps whatever the parser has not consumed yet, so a
//! request split across segments and several pipelined requests in one
//! segment are both handled without extra copies.

use crate::buffer::ByteBuffer;
use crate::connection::outgoing::Outgoing;
use crate::protocol::types::KEEP_ALIVE_MAX;
use crate::protocol::{escape_for_log, Progress, RequestParser, Response};
use crate::service::RequestHandler;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections handed to a worker
    pub connections_accepted: AtomicU64,
    /// Currently open connections
    pub active_connections: AtomicU64,
    /// Connections turned away at the ceiling
    pub connections_rejected: AtomicU64,
    /// Total requests answered
    pub requests_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_processed(&self) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// What the worker should arm the socket for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Read,
    Write,
    Close,
}

/// A single client socket and its request/response state.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    read_buf: ByteBuffer,
    parser: RequestParser,
    outgoing: Outgoing,
    keep_alive: bool,
    /// Requests answered on this connection so far
    served: u32,
    stats: Arc<ConnectionStats>,
}

impl Connection {
    /// Wraps an accepted socket, switching it to non-blocking mode.
    pub fn new(stream: TcpStream, peer: SocketAddr, stats: Arc<ConnectionStats>) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            peer,
            read_buf: ByteBuffer::new(),
            parser: RequestParser::new(),
            outgoing: Outgoing::new(),
            keep_alive: false,
            served: 0,
            stats,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Bytes received but not yet consumed by the parser.
    pub fn buffered(&self) -> usize {
        self.read_buf.readable_bytes()
    }

    /// Bytes of the current response still to be written.
    pub fn pending_write(&self) -> usize {
        self.outgoing.remaining()
    }

    /// Drains the socket into the read buffer.
    pub fn read(&mut self) -> Result<usize, ConnectionError> {
        match self.read_buf.fill_from_socket(&self.stream) {
            Ok(n) => {
                self.stats.bytes_read(n);
                trace!(peer = %self.peer, bytes = n, buffered = self.read_buf.readable_bytes(), "Read data");
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ConnectionError::PeerClosed),
            Err(e) => Err(ConnectionError::Io(e)),
        }
    }

    /// Feeds buffered bytes to the parser and queues a response once a
    /// request is complete.
    pub fn process(&mut self, handler: &RequestHandler) -> Next {
        match self.parser.parse(&mut self.read_buf) {
            Ok(Progress::NeedMoreData) => {
                trace!(peer = %self.peer, buffered = self.read_buf.readable_bytes(), "Incomplete request, need more data");
                Next::Read
            }
            Ok(Progress::Complete) => {
                let Some(request) = self.parser.take_request() else {
                    self.keep_alive = false;
                    self.queue(handler.bad_request());
                    return Next::Write;
                };
                debug!(
                    peer = %self.peer,
                    method = %request.method,
                    path = %request.path,
                    version = %request.version,
                    "Request"
                );
                // The response that reaches the advertised maximum closes.
                self.served += 1;
                self.keep_alive = request.is_keep_alive() && self.served < KEEP_ALIVE_MAX;
                self.queue(handler.handle(&request, self.keep_alive));
                Next::Write
            }
            Err(e) => {
                let pending = self.read_buf.peek();
                let line_end = self.read_buf.find_crlf().unwrap_or(pending.len()).min(256);
                warn!(
                    peer = %self.peer,
                    error = %e,
                    line = %escape_for_log(&pending[..line_end]),
                    "Malformed request"
                );
                self.keep_alive = false;
                self.read_buf.clear();
                self.parser.reset();
                self.queue(handler.bad_request());
                Next::Write
            }
        }
    }

    /// Flushes the queued response.
    ///
    /// On completion a keep-alive connection resets its parser and goes
    /// straight on to any pipelined request already buffered.
    pub fn write(&mut self, handler: &RequestHandler) -> Result<Next, ConnectionError> {
        while !self.outgoing.is_empty() {
            match self.outgoing.write_to(&self.stream) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.stats.bytes_written(n);
                    trace!(peer = %self.peer, bytes = n, remaining = self.outgoing.remaining(), "Wrote data");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Next::Write),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if !self.keep_alive {
            return Ok(Next::Close);
        }

        self.parser.reset();
        if self.read_buf.is_empty() {
            Ok(Next::Read)
        } else {
            Ok(self.process(handler))
        }
    }

    fn queue(&mut self, response: Response) {
        response.head.write_to(self.outgoing.head_mut());
        self.outgoing.set_body(response.body);
        self.stats.request_processed();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("fd", &self.fd())
            .field("peer", &self.peer)
            .field("buffered", &self.read_buf.readable_bytes())
            .field("pending_write", &self.outgoing.remaining())
            .field("keep_alive", &self.keep_alive)
            .field("served", &self.served)
            .finish()
    }
}

/// Reasons a connection is torn down.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error other than would-block
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the connection
    #[error("peer closed the connection")]
    PeerClosed,

    /// Poller reported hangup or error on the socket
    #[error("connection hung up")]
    HangUp,

    /// No activity within the idle timeout
    #[error("idle timeout")]
    IdleTimeout,
}

impl ConnectionError {
    /// Closed by the peer or by a reset, as opposed to a local failure.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::PeerClosed | ConnectionError::HangUp => true,
            ConnectionError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
            ),
            ConnectionError::IdleTimeout => false,
        }
    }
}
