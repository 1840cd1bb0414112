//! Cross-thread hand-off of accepted sockets.
//!
//! The acceptor never touches a worker's connection table. It pushes a
//! [`PendingAccept`] into the target worker's [`Inbox`] and pokes the
//! inbox's eventfd, which is registered with that worker's poller. The
//! socket changes owner when the worker drains the queue.
//!
//! The mutex only guards the queue itself; the wakeup is signalled after
//! the lock has been released.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Mutex;

/// An accepted socket on its way to a worker.
#[derive(Debug)]
pub struct PendingAccept {
    pub stream: TcpStream,
    pub peer: SocketAddr,
}

/// A non-blocking eventfd used as a wakeup signal.
///
/// Multiple `notify` calls before the reader drains it coalesce into one
/// wakeup (eventfd counter semantics).
#[derive(Debug)]
pub struct EventFd {
    fd: OwnedFd,
}

impl EventFd {
    /// Creates a new eventfd (`EFD_NONBLOCK | EFD_CLOEXEC`).
    pub fn new() -> io::Result<Self> {
        // SAFETY: plain syscall, result checked below.
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: freshly created descriptor, exclusively owned here.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Adds one to the counter, waking any poller watching this fd.
    pub fn notify(&self) -> io::Result<()> {
        let val: u64 = 1;
        // SAFETY: writes exactly 8 bytes from a live u64.
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // Counter saturated: a wakeup is already pending.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Resets the counter, returning how many notifications were pending.
    pub fn drain(&self) -> io::Result<u64> {
        let mut val: u64 = 0;
        // SAFETY: reads exactly 8 bytes into a live u64.
        let ret = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(val)
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Mutex-guarded FIFO of pending sockets plus the worker's wakeup fd.
#[derive(Debug)]
pub struct Inbox {
    queue: Mutex<VecDeque<PendingAccept>>,
    wakeup: EventFd,
}

impl Inbox {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            queue: Mutex::new(VecDeque::new()),
            wakeup: EventFd::new()?,
        })
    }

    /// The descriptor the owning worker registers for read-readiness.
    pub fn wakeup_fd(&self) -> RawFd {
        self.wakeup.as_raw_fd()
    }

    /// Queues `pending` and wakes the owning worker.
    pub fn push(&self, pending: PendingAccept) -> io::Result<()> {
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.push_back(pending);
        }
        self.wakeup.notify()
    }

    /// Wakes the owning worker without queueing anything.
    pub fn wake(&self) -> io::Result<()> {
        self.wakeup.notify()
    }

    /// Clears the wakeup signal and takes every queued socket, oldest first.
    pub fn drain(&self) -> io::Result<VecDeque<PendingAccept>> {
        self.wakeup.drain()?;
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        Ok(std::mem::take(&mut *queue))
    }

    /// Number of sockets currently queued.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
