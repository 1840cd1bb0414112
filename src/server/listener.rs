//! Listening socket setup.
//!
//! Built by hand rather than through `TcpListener::bind` so the socket is
//! non-blocking from creation, the backlog is configurable and `SO_LINGER`
//! can be applied.

use crate::config::ServerConfig;
use crate::server::ServerError;
use std::io;
use std::mem;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tracing::debug;

/// Seconds the listening socket lingers on close when `linger` is enabled.
pub const LINGER_SECS: libc::c_int = 2;

/// Creates, configures, binds and listens on the configured address.
pub fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let bind_address = config.bind_address();
    let addr = resolve(&bind_address).map_err(|source| ServerError::Bind {
        addr: bind_address.clone(),
        source,
    })?;

    let domain = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };
    // SAFETY: plain syscall, result checked below.
    let raw = unsafe {
        libc::socket(
            domain,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if raw < 0 {
        return Err(ServerError::Socket(io::Error::last_os_error()));
    }
    // SAFETY: freshly created descriptor; closed on every early return.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    set_option(&fd, libc::SO_REUSEADDR, &(1 as libc::c_int)).map_err(ServerError::Socket)?;
    if config.linger {
        let linger = libc::linger {
            l_onoff: 1,
            l_linger: LINGER_SECS,
        };
        set_option(&fd, libc::SO_LINGER, &linger).map_err(ServerError::Socket)?;
    }

    bind_raw(&fd, &addr).map_err(|source| ServerError::Bind {
        addr: bind_address.clone(),
        source,
    })?;

    // SAFETY: `fd` is a bound stream socket.
    if unsafe { libc::listen(fd.as_raw_fd(), config.backlog) } < 0 {
        return Err(ServerError::Bind {
            addr: bind_address,
            source: io::Error::last_os_error(),
        });
    }

    debug!(addr = %addr, backlog = config.backlog, linger = config.linger, "Listening socket ready");
    Ok(TcpListener::from(fd))
}

fn resolve(address: &str) -> io::Result<SocketAddr> {
    address.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
    })
}

fn set_option<T>(fd: &OwnedFd, name: libc::c_int, value: &T) -> io::Result<()> {
    // SAFETY: `value` points at a live `T` of the advertised size.
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            name,
            value as *const T as *const libc::c_void,
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn bind_raw(fd: &OwnedFd, addr: &SocketAddr) -> io::Result<()> {
    let rc = match addr {
        SocketAddr::V4(v4) => {
            // SAFETY: all-zero is a valid sockaddr_in.
            let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            // SAFETY: `sin` is a fully initialized sockaddr_in.
            unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sin as *const libc::sockaddr_in as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            }
        }
        SocketAddr::V6(v6) => {
            // SAFETY: all-zero is a valid sockaddr_in6.
            let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            sin6.sin6_scope_id = v6.scope_id();
            // SAFETY: `sin6` is a fully initialized sockaddr_in6.
            unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sin6 as *const libc::sockaddr_in6 as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            }
        }
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
