//! Server configuration.
//!
//! A `ServerConfig` is built once at startup and shared as
//! `Arc<ServerConfig>` with the acceptor and every worker.

use crate::reactor::Interest;
use std::path::PathBuf;
use std::time::Duration;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: i32 = 1024;

/// Default idle-connection timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default ceiling on simultaneously open client connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 65536;

/// Startup configuration for the whole server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// `listen(2)` backlog
    pub backlog: i32,
    /// Edge-triggered (`EPOLLET`) for both listening and connection sockets
    pub edge_triggered: bool,
    /// Idle connections are closed after this long; `None` disables eviction
    pub idle_timeout: Option<Duration>,
    /// Number of reactor worker threads
    pub worker_threads: usize,
    /// Connections beyond this are answered with 503 and closed
    pub max_connections: usize,
    /// Root directory served by the file content provider
    pub resource_dir: PathBuf,
    /// Enable `SO_LINGER` (2s) on the listening socket
    pub linger: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            edge_triggered: true,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            worker_threads: default_worker_threads(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            resource_dir: PathBuf::from("./resources"),
            linger: false,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as `host:port`.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Interest mask for the listening socket.
    pub fn listen_interest(&self) -> Interest {
        (Interest::READABLE | Interest::PEER_HANGUP).edge_triggered(self.edge_triggered)
    }

    /// Base interest mask for client sockets; combine with READABLE or
    /// WRITABLE on every (re-)arm.
    pub fn connection_interest(&self) -> Interest {
        (Interest::PEER_HANGUP | Interest::ONESHOT).edge_triggered(self.edge_triggered)
    }

    /// Idle timeout in whole seconds, as advertised in `Keep-Alive`.
    pub fn idle_timeout_secs(&self) -> Option<u64> {
        self.idle_timeout.map(|d| d.as_secs().max(1))
    }
}

/// One worker per available CPU, at least one.
pub fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}
