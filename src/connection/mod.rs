//! Connection Module
//!
//! Per-socket state driven by a reactor worker: read buffer, request
//! parser and the two-range outgoing response.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Worker thread                         │
//! │                  (fd → Connection table)                    │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ readiness
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Connection                            │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌────────────────┐   │
//! │  │ readv into  │───>│ Parse HTTP  │───>│ RequestHandler │   │
//! │  │ ByteBuffer  │    │  request    │    │   (service)    │   │
//! │  └─────────────┘    └─────────────┘    └───────┬────────┘   │
//! │                                                │            │
//! │                                                ▼            │
//! │                              ┌──────────────────────────┐   │
//! │                              │ writev head + body Bytes │   │
//! │                              └──────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Edge-triggered draining**: reads loop until the socket would block
//! - **Scatter-gather writes**: response head and body go out in one syscall
//! - **Pipelining**: buffered follow-up requests are answered in order
//! - **Statistics**: shared atomic counters across all workers

pub mod handler;
pub mod outgoing;

pub use handler::{Connection, ConnectionError, ConnectionStats, Next};
pub use outgoing::Outgoing;
