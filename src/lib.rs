//! # miniserver - An Event-Driven HTTP/1.1 Server on epoll
//!
//! miniserver is a multi-reactor HTTP/1.1 server built directly on Linux
//! `epoll`. One acceptor thread admits connections and hands them round
//! robin to a fixed pool of worker threads, each running its own event loop
//! with its own idle-timeout heap.
//!
//! ## Features
//!
//! - **Multi-Reactor**: one `epoll` instance per worker, no shared connection state
//! - **Vectored I/O**: `readv` into buffer + stack scratch, `writev` of header + body
//! - **Keep-Alive and Pipelining**: buffered requests are served back to back
//! - **Idle Eviction**: indexed min-heap of per-connection deadlines
//! - **Admission Control**: connections over the ceiling get a `503` and are closed
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              miniserver                                 │
//! │                                                                         │
//! │  ┌─────────────┐  push   ┌─────────────┐  wake   ┌──────────────────┐   │
//! │  │  Acceptor   │────────>│   Inbox N   │────────>│    Worker N      │   │
//! │  │ listen fd   │         │  + eventfd  │         │ Poller + Timers  │   │
//! │  └─────────────┘         └─────────────┘         └────────┬─────────┘   │
//! │                                                           │             │
//! │                                                           ▼             │
//! │  ┌─────────────┐         ┌─────────────┐         ┌──────────────────┐   │
//! │  │ ByteBuffer  │<────────│ Connection  │────────>│  RequestHandler  │   │
//! │  │ readv/writev│         │RequestParser│         │  Content + Creds │   │
//! │  └─────────────┘         └─────────────┘         └──────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use miniserver::{RequestHandler, Server, ServerConfig};
//!
//! let config = ServerConfig {
//!     port: 8080,
//!     ..ServerConfig::default()
//! };
//! let handler = RequestHandler::from_config(&config);
//!
//! let handle = Server::start(config, handler).expect("failed to start");
//! println!("listening on {}", handle.local_addr());
//!
//! handle.shutdown();
//! handle.join().expect("server failed");
//! ```
//!
//! ## Module Overview
//!
//! - [`buffer`]: growable byte buffer with vectored socket reads
//! - [`reactor`]: epoll poller, timer heap, cross-thread inbox, worker loop
//! - [`protocol`]: incremental HTTP/1.1 request parser and response types
//! - [`connection`]: per-socket state, outgoing queue and statistics
//! - [`service`]: routing, static content and form handling
//! - [`storage`]: credential store used by the login and register routes
//! - [`server`]: listener setup, acceptor thread and lifecycle handle
//! - [`config`]: startup configuration

pub mod buffer;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod reactor;
pub mod server;
pub mod service;
pub mod storage;

// Re-export commonly used types for convenience
pub use buffer::ByteBuffer;
pub use config::ServerConfig;
pub use connection::{Connection, ConnectionError, ConnectionStats};
pub use protocol::{ParseError, Request, RequestParser, Response, StatusCode};
pub use reactor::{Poller, TimerHeap, Worker};
pub use server::{Server, ServerError, ServerHandle};
pub use service::{FileContentProvider, RequestHandler};
pub use storage::{CredentialStore, InMemoryCredentialStore};

/// The default port miniserver listens on
pub const DEFAULT_PORT: u16 = 8888;

/// The default host miniserver binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Version of miniserver
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
