//! Acceptor thread: admission control and round-robin dispatch.
//!
//! ```text
//! listen fd readable
//!      │
//!      ▼
//! accept() until WouldBlock (once when level-triggered)
//!      │
//!      ├── active >= max_connections ──▶ 503 + close
//!      │
//!      └── inbox[next++ % workers].push(stream, peer)
//! ```

use crate::config::ServerConfig;
use crate::connection::ConnectionStats;
use crate::protocol::{Response, StatusCode};
use crate::reactor::{EventFd, Events, Inbox, Interest, PendingAccept, Poller};
use crate::server::ServerError;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, trace, warn};

/// Body of the response sent to connections over the ceiling.
pub const BUSY_MESSAGE: &str = "Server Busy!";

/// Owns the listening socket and feeds accepted sockets to the workers.
pub struct Acceptor {
    listener: TcpListener,
    poller: Poller,
    events: Events,
    wakeup: Arc<EventFd>,
    inboxes: Vec<Arc<Inbox>>,
    next: usize,
    config: Arc<ServerConfig>,
    stats: Arc<ConnectionStats>,
    shutdown: Arc<AtomicBool>,
}

impl Acceptor {
    pub fn new(
        listener: TcpListener,
        inboxes: Vec<Arc<Inbox>>,
        wakeup: Arc<EventFd>,
        config: Arc<ServerConfig>,
        stats: Arc<ConnectionStats>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, ServerError> {
        let poller = Poller::new().map_err(ServerError::Poller)?;
        poller
            .register(listener.as_raw_fd(), config.listen_interest())
            .map_err(ServerError::Poller)?;
        poller
            .register(wakeup.as_raw_fd(), Interest::READABLE)
            .map_err(ServerError::Poller)?;

        Ok(Self {
            listener,
            poller,
            events: Events::with_capacity(16),
            wakeup,
            inboxes,
            next: 0,
            config,
            stats,
            shutdown,
        })
    }

    /// Accepts until shutdown. Returns an error only for failures that make
    /// the listening socket unusable.
    pub fn run(mut self) -> Result<(), ServerError> {
        if self.inboxes.is_empty() {
            return Err(ServerError::Spawn(io::Error::new(
                io::ErrorKind::InvalidInput,
                "acceptor needs at least one worker",
            )));
        }
        info!(workers = self.inboxes.len(), "Acceptor started");

        while !self.shutdown.load(Ordering::Acquire) {
            self.poller
                .wait(&mut self.events, None)
                .map_err(ServerError::Poller)?;

            for i in 0..self.events.len() {
                let Some(event) = self.events.get(i) else {
                    break;
                };
                if event.fd() == self.wakeup.as_raw_fd() {
                    self.wakeup.drain().map_err(ServerError::Wakeup)?;
                } else if event.fd() == self.listener.as_raw_fd() {
                    self.accept_burst()?;
                }
            }
        }

        info!("Acceptor stopped");
        Ok(())
    }

    fn accept_burst(&mut self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {
                    trace!("Connection aborted before accept");
                    continue;
                }
                Err(e) if is_descriptor_exhaustion(&e) => {
                    warn!(error = %e, active = self.stats.active(), "Out of file descriptors, deferring accepts");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    return Err(ServerError::Accept(e));
                }
            }

            if !self.config.edge_triggered {
                break;
            }
        }
        Ok(())
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.stats.active() as usize >= self.config.max_connections {
            self.stats.connection_rejected();
            warn!(peer = %peer, max = self.config.max_connections, "Connection limit reached, rejecting");
            reject(stream);
            return;
        }

        let worker = self.next;
        self.next = (self.next + 1) % self.inboxes.len();

        self.stats.connection_opened();
        info!(peer = %peer, worker, "Client connected");

        if let Err(e) = self.inboxes[worker].push(PendingAccept { stream, peer }) {
            // Queued but not signalled; picked up on the worker's next wakeup.
            warn!(worker, error = %e, "Failed to wake worker");
        }
    }
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("listener", &self.listener)
            .field("workers", &self.inboxes.len())
            .field("next", &self.next)
            .finish()
    }
}

/// Bytes sent to a connection refused at the ceiling.
pub fn busy_response() -> Vec<u8> {
    let response = Response::new(
        StatusCode::ServiceUnavailable,
        "text/plain",
        bytes::Bytes::from_static(BUSY_MESSAGE.as_bytes()),
        false,
        None,
    );
    let mut head = crate::buffer::ByteBuffer::new();
    response.head.write_to(&mut head);

    let mut out = head.peek().to_vec();
    out.extend_from_slice(&response.body);
    out
}

fn reject(mut stream: TcpStream) {
    if let Err(e) = stream.set_nonblocking(true).and_then(|()| stream.write_all(&busy_response())) {
        trace!(error = %e, "Failed to send busy response");
    }
}

fn is_descriptor_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::listener;
    use std::io::Read;
    use std::time::Duration;

    #[test]
    fn test_busy_response_format() {
        let text = String::from_utf8(busy_response()).unwrap();
        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\nConnection: close\r\n"));
        assert!(text.contains("Content-Length: 12\r\n"));
        assert!(text.ends_with("\r\n\r\nServer Busy!"));
    }

    #[test]
    fn test_descriptor_exhaustion() {
        assert!(is_descriptor_exhaustion(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(is_descriptor_exhaustion(&io::Error::from_raw_os_error(libc::ENFILE)));
        assert!(!is_descriptor_exhaustion(&io::Error::from_raw_os_error(libc::EAGAIN)));
    }

    fn acceptor(max_connections: usize, workers: usize) -> (Acceptor, Vec<Arc<Inbox>>, SocketAddr) {
        let config = Arc::new(ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_connections,
            ..ServerConfig::default()
        });
        let listener = listener::bind(&config).unwrap();
        let addr = listener.local_addr().unwrap();
        let inboxes: Vec<Arc<Inbox>> = (0..workers).map(|_| Arc::new(Inbox::new().unwrap())).collect();
        let acceptor = Acceptor::new(
            listener,
            inboxes.clone(),
            Arc::new(EventFd::new().unwrap()),
            config,
            Arc::new(ConnectionStats::new()),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        (acceptor, inboxes, addr)
    }

    fn accept_pending(acceptor: &mut Acceptor, expected: usize) {
        for _ in 0..100 {
            acceptor.accept_burst().unwrap();
            let seen = acceptor.stats.connections_accepted.load(Ordering::Relaxed)
                + acceptor.stats.connections_rejected.load(Ordering::Relaxed);
            if seen as usize >= expected {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("connections never arrived");
    }

    #[test]
    fn test_round_robin_dispatch() {
        let (mut acceptor, inboxes, addr) = acceptor(100, 2);
        let _clients: Vec<TcpStream> = (0..4).map(|_| TcpStream::connect(addr).unwrap()).collect();

        accept_pending(&mut acceptor, 4);

        assert_eq!(inboxes[0].len(), 2);
        assert_eq!(inboxes[1].len(), 2);
        assert_eq!(acceptor.stats.active(), 4);
    }

    #[test]
    fn test_ceiling_rejects_with_503() {
        let (mut acceptor, inboxes, addr) = acceptor(1, 1);
        let _first = TcpStream::connect(addr).unwrap();
        accept_pending(&mut acceptor, 1);

        let mut second = TcpStream::connect(addr).unwrap();
        second
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        accept_pending(&mut acceptor, 2);

        let mut response = String::new();
        second.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 503"));
        assert!(response.ends_with(BUSY_MESSAGE));

        assert_eq!(inboxes[0].len(), 1);
        assert_eq!(acceptor.stats.connections_rejected.load(Ordering::Relaxed), 1);
    }
}
