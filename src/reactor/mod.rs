//! Reactor Module
//!
//! Readiness polling, idle timers and the per-thread event loop.
//!
//! ## Thread Layout
//!
//! ```text
//!                 ┌──────────────────────┐
//!                 │   Acceptor thread    │
//!                 │  Poller(listen fd)   │
//!                 └──────────┬───────────┘
//!                            │ round robin
//!          ┌─────────────────┼─────────────────┐
//!          ▼                 ▼                 ▼
//!     ┌─────────┐       ┌─────────┐       ┌─────────┐
//!     │ Inbox 0 │       │ Inbox 1 │       │ Inbox N │
//!     │ eventfd │       │ eventfd │       │ eventfd │
//!     └────┬────┘       └────┬────┘       └────┬────┘
//!          ▼                 ▼                 ▼
//!     ┌─────────┐       ┌─────────┐       ┌─────────┐
//!     │Worker 0 │       │Worker 1 │       │Worker N │
//!     │ Poller  │       │ Poller  │       │ Poller  │
//!     │ Timers  │       │ Timers  │       │ Timers  │
//!     │ fd→Conn │       │ fd→Conn │       │ fd→Conn │
//!     └─────────┘       └─────────┘       └─────────┘
//! ```
//!
//! A connection belongs to exactly one worker from the moment it is drained
//! out of that worker's inbox until it is closed. Only the inbox is shared
//! between threads.

pub mod inbox;
pub mod poller;
pub mod timer;
pub mod worker;

pub use inbox::{EventFd, Inbox, PendingAccept};
pub use poller::{Event, Events, Interest, Poller, DEFAULT_EVENT_CAPACITY};
pub use timer::TimerHeap;
pub use worker::{TimerAction, Worker};
