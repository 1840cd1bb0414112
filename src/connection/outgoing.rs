//! Two-range outgoing data for vectored writes.
//!
//! Range 0 is the response head in a [`ByteBuffer`]; range 1 is the body,
//! borrowed from the content provider as `Bytes`. Both go out in a single
//! `writev` call, and a short write advances exactly the bytes the kernel
//! took.

use crate::buffer::ByteBuffer;
use bytes::{Buf, Bytes};
use std::io;
use std::os::fd::AsRawFd;

/// Pending response bytes of one connection.
#[derive(Debug, Default)]
pub struct Outgoing {
    head: ByteBuffer,
    body: Bytes,
}

impl Outgoing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write buffer the response head is serialized into.
    pub fn head_mut(&mut self) -> &mut ByteBuffer {
        &mut self.head
    }

    pub fn head(&self) -> &[u8] {
        self.head.peek()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    /// Bytes still waiting to be written across both ranges.
    pub fn remaining(&self) -> usize {
        self.head.readable_bytes() + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Marks `n` bytes as written.
    ///
    /// Less than the head: only the head moves and the body is untouched.
    /// Otherwise the head is released and the rest comes off the body.
    pub fn advance(&mut self, n: usize) {
        let head_len = self.head.readable_bytes();
        if n < head_len {
            self.head.retrieve(n);
            return;
        }
        self.head.clear();
        let rest = (n - head_len).min(self.body.len());
        self.body.advance(rest);
    }

    /// Drops anything not yet written.
    pub fn clear(&mut self) {
        self.head.clear();
        self.body = Bytes::new();
    }

    /// One `writev` of both ranges. Advances by what was written and returns
    /// the count. `WouldBlock` and `Interrupted` are returned as errors for
    /// the caller to act on.
    pub fn write_to<S: AsRawFd>(&mut self, socket: &S) -> io::Result<usize> {
        let head = self.head.peek();
        let iov = [
            libc::iovec {
                iov_base: head.as_ptr() as *mut libc::c_void,
                iov_len: head.len(),
            },
            libc::iovec {
                iov_base: self.body.as_ptr() as *mut libc::c_void,
                iov_len: self.body.len(),
            },
        ];
        let count = if self.body.is_empty() { 1 } else { 2 };

        // SAFETY: both iovecs describe live memory of the given length; the
        // kernel only reads from them.
        let n = unsafe { libc::writev(socket.as_raw_fd(), iov.as_ptr(), count) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        let n = n as usize;
        self.advance(n);
        Ok(n)
    }
}
