//! miniserver - An Event-Driven HTTP/1.1 Server on epoll
//!
//! This is the main entry point for the miniserver binary.
//! It parses the command line, sets up logging, starts the reactor threads
//! and waits for Ctrl+C to shut them down.

use anyhow::Context;
use miniserver::{RequestHandler, Server, ServerConfig};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How often the binary checks whether the server stopped on its own
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Command-line options
struct Options {
    /// Server configuration passed to the library
    server: ServerConfig,
    /// Explicit log filter; falls back to `RUST_LOG`, then `info`
    log_level: Option<String>,
    /// Disable logging entirely
    quiet: bool,
}

impl Options {
    /// Parse options from command-line arguments
    fn from_args() -> Self {
        let mut options = Options {
            server: ServerConfig::default(),
            log_level: None,
            quiet: false,
        };
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--host" | "-h" => {
                    options.server.host = value(&args, i, flag).to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    options.server.port = parse(&args, i, flag, "port number");
                    i += 2;
                }
                "--backlog" => {
                    options.server.backlog = parse(&args, i, flag, "backlog");
                    i += 2;
                }
                "--timeout-ms" => {
                    let ms: u64 = parse(&args, i, flag, "timeout");
                    options.server.idle_timeout = (ms > 0).then(|| Duration::from_millis(ms));
                    i += 2;
                }
                "--workers" => {
                    let workers: usize = parse(&args, i, flag, "worker count");
                    if workers == 0 {
                        fail("--workers must be at least 1");
                    }
                    options.server.worker_threads = workers;
                    i += 2;
                }
                "--max-connections" => {
                    options.server.max_connections = parse(&args, i, flag, "connection limit");
                    i += 2;
                }
                "--resources" => {
                    options.server.resource_dir = PathBuf::from(value(&args, i, flag));
                    i += 2;
                }
                "--log-level" => {
                    options.log_level = Some(value(&args, i, flag).to_string());
                    i += 2;
                }
                "--level-triggered" => {
                    options.server.edge_triggered = false;
                    i += 1;
                }
                "--linger" => {
                    options.server.linger = true;
                    i += 1;
                }
                "--quiet" | "-q" => {
                    options.quiet = true;
                    i += 1;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("miniserver version {}", miniserver::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        options
    }

    fn env_filter(&self) -> EnvFilter {
        if self.quiet {
            return EnvFilter::new("off");
        }
        match &self.log_level {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        }
    }
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

/// Returns the value following the flag at `i`, or exits.
fn value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(v) => v.as_str(),
        None => fail(&format!("{} requires a value", flag)),
    }
}

fn parse<T: FromStr>(args: &[String], i: usize, flag: &str, what: &str) -> T {
    let raw = value(args, i, flag);
    raw.parse()
        .unwrap_or_else(|_| fail(&format!("invalid {}: {}", what, raw)))
}

fn print_help() {
    println!(
        r#"
miniserver - An Event-Driven HTTP/1.1 Server on epoll

USAGE:
    miniserver [OPTIONS]

OPTIONS:
    -h, --host <HOST>            Host to bind to (default: 0.0.0.0)
    -p, --port <PORT>            Port to listen on (default: 8888)
        --backlog <N>            listen(2) backlog (default: 1024)
        --level-triggered        Use level-triggered epoll instead of edge-triggered
        --timeout-ms <MS>        Idle connection timeout, 0 disables (default: 60000)
        --workers <N>            Reactor worker threads (default: CPU count)
        --max-connections <N>    Concurrent connection ceiling (default: 65536)
        --resources <DIR>        Directory to serve files from (default: ./resources)
        --linger                 Enable SO_LINGER on the listening socket
        --log-level <FILTER>     Log filter, e.g. debug or miniserver=trace
    -q, --quiet                  Disable logging
    -v, --version                Print version information
        --help                   Print this help message

EXAMPLES:
    miniserver                               # Serve ./resources on 0.0.0.0:8888
    miniserver --port 9006 --workers 8       # Eight reactors on port 9006
    miniserver --timeout-ms 0 --quiet        # No idle eviction, no logs

CONNECTING:
    $ curl -v http://127.0.0.1:8888/
    $ curl -d 'username=ariz&password=pw' http://127.0.0.1:8888/register
"#
    );
}

fn print_banner(config: &ServerConfig) {
    let timeout = match config.idle_timeout {
        Some(d) => format!("{}ms", d.as_millis()),
        None => "disabled".to_string(),
    };
    println!(
        r#"
miniserver v{} - Event-Driven HTTP/1.1 Server
──────────────────────────────────────────────────────────────
Listening on     {}
Trigger mode     {}
Workers          {}
Idle timeout     {}
Max connections  {}
Resources        {}

Use Ctrl+C to shutdown gracefully.
"#,
        miniserver::VERSION,
        config.bind_address(),
        if config.edge_triggered { "edge" } else { "level" },
        config.worker_threads,
        timeout,
        config.max_connections,
        config.resource_dir.display(),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let options = Options::from_args();

    // Set up logging
    FmtSubscriber::builder()
        .with_env_filter(options.env_filter())
        .with_target(false)
        .with_thread_names(true)
        .with_file(false)
        .with_line_number(false)
        .init();

    let config = options.server;
    if !options.quiet {
        print_banner(&config);
    }

    let handler = RequestHandler::from_config(&config);
    let handle = Server::start(config, handler).context("failed to start server")?;
    info!(addr = %handle.local_addr(), "Ready to accept connections");

    // Wait for Ctrl+C, or for a reactor thread to stop the server itself
    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to install Ctrl+C handler")?;
            info!("Shutdown signal received, stopping server...");
        }
        _ = async {
            while !handle.is_shutdown() {
                tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;
            }
        } => {
            error!("Server stopped unexpectedly");
        }
    }

    handle.shutdown();
    let stats = std::sync::Arc::clone(handle.stats());
    tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("server join task failed")??;

    info!(
        accepted = stats.connections_accepted.load(std::sync::atomic::Ordering::Relaxed),
        requests = stats.requests_processed.load(std::sync::atomic::Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}
