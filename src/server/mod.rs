//! Server Module
//!
//! Wires the listening socket, the acceptor thread and the worker threads
//! together and hands back a [`ServerHandle`] for shutdown.
//!
//! ## Startup
//!
//! ```text
//! Server::start(config, handler)
//!    │
//!    ├── listener::bind()        socket, SO_REUSEADDR, [SO_LINGER], bind, listen
//!    ├── N × Inbox               one eventfd-backed queue per worker
//!    ├── N × "worker-{i}"        Worker::run()
//!    └── "acceptor"              Acceptor::run()
//! ```
//!
//! Setup failures come back from `start`. A worker or acceptor that fails
//! later stops the whole server and reports its error from `join`.

pub mod acceptor;
pub mod listener;

pub use acceptor::Acceptor;

use crate::config::ServerConfig;
use crate::connection::ConnectionStats;
use crate::reactor::{EventFd, Inbox, Worker};
use crate::service::RequestHandler;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{info, warn};

/// Server-level failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Address could not be resolved, bound or listened on
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    /// Listening socket creation or option setup failed
    #[error("socket setup failed: {0}")]
    Socket(io::Error),

    /// epoll creation or control failed
    #[error("poller failure: {0}")]
    Poller(io::Error),

    /// eventfd creation, signal or drain failed
    #[error("wakeup descriptor failure: {0}")]
    Wakeup(io::Error),

    /// accept(2) failed with a non-transient error
    #[error("accept failed: {0}")]
    Accept(io::Error),

    /// A thread could not be started
    #[error("failed to spawn thread: {0}")]
    Spawn(io::Error),

    /// A worker's event loop failed
    #[error("worker {id} failed: {source}")]
    Worker { id: usize, source: io::Error },

    /// A server thread panicked
    #[error("thread {name} panicked")]
    Panicked { name: String },
}

/// Sets the shared flag and wakes every thread so it can observe it.
#[derive(Debug, Clone)]
struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    inboxes: Vec<Arc<Inbox>>,
    acceptor: Arc<EventFd>,
}

impl ShutdownSignal {
    fn trigger(&self) {
        if self.flag.swap(true, Ordering::AcqRel) {
            return;
        }
        for inbox in &self.inboxes {
            if let Err(e) = inbox.wake() {
                warn!(error = %e, "Failed to wake worker for shutdown");
            }
        }
        if let Err(e) = self.acceptor.notify() {
            warn!(error = %e, "Failed to wake acceptor for shutdown");
        }
    }

    fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Entry point for running the server.
#[derive(Debug)]
pub struct Server;

impl Server {
    /// Binds the listener and starts the acceptor and worker threads.
    pub fn start(config: ServerConfig, handler: RequestHandler) -> Result<ServerHandle, ServerError> {
        let config = Arc::new(config);
        let listener = listener::bind(&config)?;
        let local_addr = listener.local_addr().map_err(ServerError::Socket)?;

        let stats = Arc::new(ConnectionStats::new());
        let flag = Arc::new(AtomicBool::new(false));
        let worker_count = config.worker_threads.max(1);

        let inboxes = (0..worker_count)
            .map(|_| Inbox::new().map(Arc::new))
            .collect::<io::Result<Vec<_>>>()
            .map_err(ServerError::Wakeup)?;
        let acceptor_wakeup = Arc::new(EventFd::new().map_err(ServerError::Wakeup)?);

        let signal = ShutdownSignal {
            flag: Arc::clone(&flag),
            inboxes: inboxes.clone(),
            acceptor: Arc::clone(&acceptor_wakeup),
        };
        let mut threads = Vec::with_capacity(worker_count + 1);

        for (id, inbox) in inboxes.iter().enumerate() {
            let spawned = Worker::new(
                id,
                Arc::clone(inbox),
                handler.clone(),
                Arc::clone(&config),
                Arc::clone(&stats),
                Arc::clone(&flag),
            )
            .map_err(|source| ServerError::Worker { id, source })
            .and_then(|worker| {
                let signal = signal.clone();
                spawn(format!("worker-{}", id), move || {
                    worker
                        .run()
                        .map_err(|source| ServerError::Worker { id, source })
                        .inspect_err(|_| signal.trigger())
                })
            });

            match spawned {
                Ok(thread) => threads.push(thread),
                Err(e) => return Err(abort_start(&signal, threads, e)),
            }
        }

        let spawned = Acceptor::new(
            listener,
            inboxes.clone(),
            acceptor_wakeup,
            Arc::clone(&config),
            Arc::clone(&stats),
            Arc::clone(&flag),
        )
        .and_then(|acceptor| {
            let signal = signal.clone();
            spawn("acceptor".to_string(), move || {
                acceptor.run().inspect_err(|_| signal.trigger())
            })
        });

        match spawned {
            Ok(thread) => threads.push(thread),
            Err(e) => return Err(abort_start(&signal, threads, e)),
        }

        info!(
            addr = %local_addr,
            workers = worker_count,
            edge_triggered = config.edge_triggered,
            idle_timeout_ms = config.idle_timeout.map(|d| d.as_millis() as u64),
            max_connections = config.max_connections,
            "Server started"
        );

        Ok(ServerHandle {
            local_addr,
            signal,
            threads,
            stats,
            config,
        })
    }
}

type ServerThread = (String, JoinHandle<Result<(), ServerError>>);

fn spawn<F>(name: String, body: F) -> Result<ServerThread, ServerError>
where
    F: FnOnce() -> Result<(), ServerError> + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(body)
        .map(|handle| (name, handle))
        .map_err(ServerError::Spawn)
}

/// Stops whatever already started, then hands back the original error.
fn abort_start(signal: &ShutdownSignal, threads: Vec<ServerThread>, error: ServerError) -> ServerError {
    signal.trigger();
    for (_, handle) in threads {
        let _ = handle.join();
    }
    error
}

/// Handle to a running server.
///
/// Dropping the handle requests shutdown but does not wait for the threads.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    signal: ShutdownSignal,
    threads: Vec<ServerThread>,
    stats: Arc<ConnectionStats>,
    config: Arc<ServerConfig>,
}

impl ServerHandle {
    /// Address the listener is bound to (with the real port when 0 was
    /// requested).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Asks every thread to stop. Returns immediately.
    pub fn shutdown(&self) {
        if !self.signal.is_triggered() {
            info!("Shutting down server");
        }
        self.signal.trigger();
    }

    pub fn is_shutdown(&self) -> bool {
        self.signal.is_triggered()
    }

    /// Waits for every thread to exit. Returns the first error reported.
    pub fn join(mut self) -> Result<(), ServerError> {
        let mut first_error = None;
        for (name, handle) in std::mem::take(&mut self.threads) {
            let result = match handle.join() {
                Ok(result) => result,
                Err(_) => {
                    self.signal.trigger();
                    Err(ServerError::Panicked { name })
                }
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.signal.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryCredentialStore;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_test::assert_ok;

    fn resource_dir() -> PathBuf {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "miniserver-e2e-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir).unwrap();

        for (name, body) in [
            ("index.html", "<h1>index</h1>"),
            ("404.html", "<h1>missing</h1>"),
            ("welcome.html", "<h1>welcome</h1>"),
            ("error.html", "<h1>error</h1>"),
            ("app.js", "console.log(1);"),
        ] {
            fs::write(dir.join(name), body).unwrap();
            fs::set_permissions(dir.join(name), fs::Permissions::from_mode(0o644)).unwrap();
        }
        fs::write(dir.join("secret.html"), "hidden").unwrap();
        fs::set_permissions(dir.join("secret.html"), fs::Permissions::from_mode(0o600)).unwrap();
        dir
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            worker_threads: 2,
            idle_timeout: Some(Duration::from_secs(5)),
            resource_dir: resource_dir(),
            ..ServerConfig::default()
        }
    }

    fn start(config: ServerConfig) -> ServerHandle {
        let handler = RequestHandler::from_config(&config);
        Server::start(config, handler).unwrap()
    }

    async fn stop(handle: ServerHandle) {
        let dir = handle.config().resource_dir.clone();
        handle.shutdown();
        let joined = tokio::task::spawn_blocking(move || handle.join()).await.unwrap();
        assert_ok!(joined);
        fs::remove_dir_all(dir).ok();
    }

    /// Reads one response at a time off a stream, keeping leftover bytes.
    struct ResponseReader {
        stream: TcpStream,
        buf: Vec<u8>,
    }

    impl ResponseReader {
        fn new(stream: TcpStream) -> Self {
            Self {
                stream,
                buf: Vec::new(),
            }
        }

        async fn fill(&mut self) -> usize {
            let mut chunk = [0u8; 4096];
            let n = tokio::time::timeout(Duration::from_secs(3), self.stream.read(&mut chunk))
                .await
                .expect("timed out waiting for response")
                .unwrap();
            self.buf.extend_from_slice(&chunk[..n]);
            n
        }

        /// Returns (head, body) of the next response.
        async fn next(&mut self) -> (String, String) {
            let head_end = loop {
                if let Some(pos) = self.buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
                assert!(self.fill().await > 0, "connection closed mid-response");
            };
            let head = String::from_utf8(self.buf[..head_end].to_vec()).unwrap();
            let length: usize = head
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length: "))
                .unwrap()
                .trim()
                .parse()
                .unwrap();

            while self.buf.len() < head_end + length {
                assert!(self.fill().await > 0, "connection closed mid-body");
            }
            let body = String::from_utf8(self.buf[head_end..head_end + length].to_vec()).unwrap();
            self.buf.drain(..head_end + length);
            (head, body)
        }

        async fn expect_eof(&mut self) {
            assert_eq!(self.fill().await, 0);
        }
    }

    async fn connect(handle: &ServerHandle) -> ResponseReader {
        ResponseReader::new(TcpStream::connect(handle.local_addr()).await.unwrap())
    }

    #[tokio::test]
    async fn test_keep_alive_pipelined_requests() {
        let handle = start(test_config());
        let mut client = connect(&handle).await;

        client
            .stream
            .write_all(
                b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n\
                  GET /app.js HTTP/1.1\r\nConnection: keep-alive\r\n\r\n",
            )
            .await
            .unwrap();

        let (head, body) = client.next().await;
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Connection: keep-alive\r\n"));
        assert!(head.contains("Keep-Alive: max=6, timeout=5\r\n"));
        assert_eq!(body, "<h1>index</h1>");

        let (head, body) = client.next().await;
        assert!(head.contains("Content-Type: text/javascript\r\n"));
        assert_eq!(body, "console.log(1);");

        // Same connection still usable afterwards.
        client
            .stream
            .write_all(b"GET /index HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let (head, _) = client.next().await;
        assert!(head.contains("Connection: close\r\n"));
        client.expect_eof().await;

        stop(handle).await;
    }

    #[tokio::test]
    async fn test_not_found_and_forbidden() {
        let handle = start(test_config());

        let mut client = connect(&handle).await;
        client
            .stream
            .write_all(b"GET /nope.png HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
            .await
            .unwrap();
        let (head, body) = client.next().await;
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert_eq!(body, "<h1>missing</h1>");

        client
            .stream
            .write_all(b"GET /secret.html HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let (head, body) = client.next().await;
        assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(body.contains("403 : Forbidden"));

        stop(handle).await;
    }

    #[tokio::test]
    async fn test_malformed_request_gets_400() {
        let handle = start(test_config());
        let mut client = connect(&handle).await;

        client.stream.write_all(b"GET /\r\n").await.unwrap();
        let (head, _) = client.next().await;
        assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\nConnection: close\r\n"));
        client.expect_eof().await;

        stop(handle).await;
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let handle = start(test_config());

        let post = |path: &str, body: &str| {
            format!(
                "POST {} HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\
                 Content-Length: {}\r\nConnection: keep-alive\r\n\r\n{}",
                path,
                body.len(),
                body
            )
        };

        let mut client = connect(&handle).await;
        for (path, body, expected) in [
            ("/login", "username=ariz&password=pw", "<h1>error</h1>"),
            ("/register", "username=ariz&password=pw", "<h1>welcome</h1>"),
            ("/register", "username=ariz&password=other", "<h1>error</h1>"),
            ("/login", "username=ariz&password=pw", "<h1>welcome</h1>"),
            ("/login", "username=ariz&password=bad", "<h1>error</h1>"),
        ] {
            client.stream.write_all(post(path, body).as_bytes()).await.unwrap();
            let (head, got) = client.next().await;
            assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
            assert_eq!(got, expected, "{} {}", path, body);
        }

        stop(handle).await;
    }

    #[tokio::test]
    async fn test_connection_ceiling_returns_503() {
        let config = ServerConfig {
            max_connections: 1,
            ..test_config()
        };
        let handle = start(config);

        let mut first = connect(&handle).await;
        first
            .stream
            .write_all(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
            .await
            .unwrap();
        first.next().await;
        assert_eq!(handle.stats().active(), 1);

        let mut second = connect(&handle).await;
        let (head, body) = second.next().await;
        assert!(head.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert_eq!(body, "Server Busy!");
        second.expect_eof().await;
        assert_eq!(
            handle.stats().connections_rejected.load(Ordering::Relaxed),
            1
        );

        stop(handle).await;
    }

    #[tokio::test]
    async fn test_level_triggered_mode() {
        let config = ServerConfig {
            edge_triggered: false,
            worker_threads: 1,
            ..test_config()
        };
        let handle = start(config);

        for _ in 0..3 {
            let mut client = connect(&handle).await;
            client
                .stream
                .write_all(b"GET /index.html HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
            let (head, body) = client.next().await;
            assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
            assert_eq!(body, "<h1>index</h1>");
        }

        stop(handle).await;
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_connection() {
        let config = ServerConfig {
            idle_timeout: Some(Duration::from_millis(200)),
            ..test_config()
        };
        let handle = start(config);

        let mut client = connect(&handle).await;
        client.expect_eof().await;

        stop(handle).await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let handle = start(test_config());
        let addr = handle.local_addr();
        let mut client = connect(&handle).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        stop(handle).await;

        client.expect_eof().await;
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[test]
    fn test_start_fails_on_taken_port() {
        let first = start(test_config());
        let taken = ServerConfig {
            port: first.local_addr().port(),
            ..test_config()
        };

        let result = Server::start(taken, RequestHandler::new(
            Arc::new(crate::service::MemoryContentProvider::new()),
            Arc::new(InMemoryCredentialStore::new()),
        ));
        assert!(matches!(result, Err(ServerError::Bind { .. })));

        first.shutdown();
        assert!(first.join().is_ok());
    }
}
