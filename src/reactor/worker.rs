//! Per-thread event loop.
//!
//! A worker owns a poller, an idle-timer heap and an `fd -> Connection`
//! table. None of these are shared: the only way in from another thread is
//! the worker's [`Inbox`].
//!
//! ## Loop
//!
//! ```text
//! loop {
//!     timeout = fire expired idle timers, distance to next deadline
//!     wait(timeout)
//!     for each ready fd:
//!         inbox eventfd   -> register every pending socket
//!         hangup / error  -> close
//!         readable        -> renew timer, read, process, re-arm
//!         writable        -> renew timer, write, re-arm
//! }
//! ```
//!
//! Client sockets are registered `ONESHOT`, so every dispatch ends with an
//! explicit re-arm for read or write, or with a close.
//!
//! Teardown always runs in the same order: deregister from the poller,
//! cancel the timer entry, drop the table entry.

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionError, ConnectionStats, Next};
use crate::reactor::inbox::{Inbox, PendingAccept};
use crate::reactor::poller::{Event, Events, Interest, Poller, DEFAULT_EVENT_CAPACITY};
use crate::reactor::timer::TimerHeap;
use crate::service::RequestHandler;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// What a timer entry does when it fires. Entries carry only the fd; the
/// connection itself is looked up in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    CloseIdle,
}

/// One reactor thread's state.
pub struct Worker {
    id: usize,
    poller: Poller,
    events: Events,
    timers: TimerHeap<RawFd, TimerAction>,
    connections: HashMap<RawFd, Connection>,
    inbox: Arc<Inbox>,
    handler: RequestHandler,
    config: Arc<ServerConfig>,
    stats: Arc<ConnectionStats>,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    /// Creates the worker's poller and registers its inbox wakeup fd.
    pub fn new(
        id: usize,
        inbox: Arc<Inbox>,
        handler: RequestHandler,
        config: Arc<ServerConfig>,
        stats: Arc<ConnectionStats>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let poller = Poller::new()?;
        poller.register(inbox.wakeup_fd(), Interest::READABLE)?;

        Ok(Self {
            id,
            poller,
            events: Events::with_capacity(DEFAULT_EVENT_CAPACITY),
            timers: TimerHeap::new(),
            connections: HashMap::new(),
            inbox,
            handler,
            config,
            stats,
            shutdown,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of connections this worker currently owns.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Runs until the shutdown flag is observed. A poller failure ends the
    /// loop with an error; connections are closed either way.
    pub fn run(mut self) -> io::Result<()> {
        info!(worker = self.id, "Worker started");
        let result = self.event_loop();
        self.close_all();

        match &result {
            Ok(()) => info!(worker = self.id, "Worker stopped"),
            Err(e) => error!(worker = self.id, error = %e, "Worker failed"),
        }
        result
    }

    fn event_loop(&mut self) -> io::Result<()> {
        while !self.shutdown.load(Ordering::Acquire) {
            let timeout = self.expire_idle();
            self.poller.wait(&mut self.events, timeout)?;

            for i in 0..self.events.len() {
                let Some(event) = self.events.get(i) else {
                    break;
                };
                self.dispatch(event);
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, event: Event) {
        let fd = event.fd();

        if fd == self.inbox.wakeup_fd() {
            self.register_pending();
            return;
        }
        if !self.connections.contains_key(&fd) {
            trace!(worker = self.id, fd, "Event for unknown fd");
            return;
        }

        if event.is_hangup_or_error() {
            self.close(fd, Some(ConnectionError::HangUp));
        } else if event.is_readable() {
            self.on_readable(fd);
        } else if event.is_writable() {
            self.on_writable(fd);
        }
    }

    /// Takes ownership of every socket queued by the acceptor.
    fn register_pending(&mut self) {
        let pending = match self.inbox.drain() {
            Ok(pending) => pending,
            Err(e) => {
                error!(worker = self.id, error = %e, "Failed to drain inbox");
                return;
            }
        };

        for PendingAccept { stream, peer } in pending {
            let conn = match Connection::new(stream, peer, Arc::clone(&self.stats)) {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(worker = self.id, peer = %peer, error = %e, "Failed to set up connection");
                    self.stats.connection_closed();
                    continue;
                }
            };

            let fd = conn.fd();
            let interest = self.config.connection_interest() | Interest::READABLE;
            if let Err(e) = self.poller.register(fd, interest) {
                warn!(worker = self.id, fd, peer = %peer, error = %e, "Failed to register connection");
                self.stats.connection_closed();
                continue;
            }

            if let Some(timeout) = self.config.idle_timeout {
                self.timers.insert(fd, timeout, TimerAction::CloseIdle);
            }
            self.connections.insert(fd, conn);
            debug!(worker = self.id, fd, peer = %peer, "Connection registered");
        }
    }

    fn on_readable(&mut self, fd: RawFd) {
        self.touch(fd);
        let Some(conn) = self.connections.get_mut(&fd) else {
            return;
        };

        let next = match conn.read() {
            Ok(_) => conn.process(&self.handler),
            Err(e) => {
                self.close(fd, Some(e));
                return;
            }
        };
        self.rearm(fd, next);
    }

    fn on_writable(&mut self, fd: RawFd) {
        self.touch(fd);
        let Some(conn) = self.connections.get_mut(&fd) else {
            return;
        };

        match conn.write(&self.handler) {
            Ok(next) => self.rearm(fd, next),
            Err(e) => self.close(fd, Some(e)),
        }
    }

    fn touch(&mut self, fd: RawFd) {
        if let Some(timeout) = self.config.idle_timeout {
            self.timers.renew(fd, timeout);
        }
    }

    fn rearm(&mut self, fd: RawFd, next: Next) {
        let base = self.config.connection_interest();
        let interest = match next {
            Next::Read => base | Interest::READABLE,
            Next::Write => base | Interest::WRITABLE,
            Next::Close => {
                self.close(fd, None);
                return;
            }
        };
        if let Err(e) = self.poller.reregister(fd, interest) {
            self.close(fd, Some(ConnectionError::Io(e)));
        }
    }

    /// Fires due idle timers and returns how long the next wait may block.
    fn expire_idle(&mut self) -> Option<Duration> {
        let Worker {
            id,
            poller,
            timers,
            connections,
            stats,
            ..
        } = self;

        timers.fire_expired(|timers, fd, action| match action {
            TimerAction::CloseIdle => teardown(
                *id,
                poller,
                timers,
                connections,
                stats,
                fd,
                Some(ConnectionError::IdleTimeout),
            ),
        })
    }

    fn close(&mut self, fd: RawFd, reason: Option<ConnectionError>) {
        teardown(
            self.id,
            &self.poller,
            &mut self.timers,
            &mut self.connections,
            &self.stats,
            fd,
            reason,
        );
    }

    fn close_all(&mut self) {
        let fds: Vec<RawFd> = self.connections.keys().copied().collect();
        if !fds.is_empty() {
            info!(worker = self.id, connections = fds.len(), "Closing connections");
        }
        for fd in fds {
            self.close(fd, None);
        }

        // Sockets queued after the last wakeup were counted active by the
        // acceptor but never registered here.
        match self.inbox.drain() {
            Ok(pending) => {
                for PendingAccept { peer, .. } in pending {
                    debug!(worker = self.id, peer = %peer, "Dropping unregistered connection");
                    self.stats.connection_closed();
                }
            }
            Err(e) => warn!(worker = self.id, error = %e, "Failed to drain inbox on shutdown"),
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("connections", &self.connections.len())
            .field("timers", &self.timers.len())
            .finish()
    }
}

/// Deregister, cancel the timer, then drop the connection.
fn teardown(
    worker: usize,
    poller: &Poller,
    timers: &mut TimerHeap<RawFd, TimerAction>,
    connections: &mut HashMap<RawFd, Connection>,
    stats: &ConnectionStats,
    fd: RawFd,
    reason: Option<ConnectionError>,
) {
    if let Err(e) = poller.deregister(fd) {
        trace!(worker, fd, error = %e, "Deregister failed");
    }
    timers.cancel(fd);

    let Some(conn) = connections.remove(&fd) else {
        return;
    };
    stats.connection_closed();

    match reason {
        None => debug!(worker, fd, peer = %conn.peer(), "Connection closed"),
        Some(ConnectionError::IdleTimeout) => {
            debug!(worker, fd, peer = %conn.peer(), "Idle connection evicted")
        }
        Some(e) if e.is_disconnect() => {
            debug!(worker, fd, peer = %conn.peer(), reason = %e, "Client disconnected")
        }
        Some(e) => warn!(worker, fd, peer = %conn.peer(), error = %e, "Connection error"),
    }
}
