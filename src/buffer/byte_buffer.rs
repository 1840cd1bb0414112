//! Growable byte window with vectored socket fill.
//!
//! ## Growth Policy
//!
//! `append` never reallocates while compaction can make room:
//!
//! 1. Enough tail space: copy straight in.
//! 2. Tail + prependable space is enough: slide the unread region to 0.
//! 3. Otherwise: slide, then resize to exactly `readable + incoming`.
//!
//! ## Socket Fill
//!
//! `fill_from_socket` reads into two regions with one `readv` call: the
//! buffer's writable tail and a stack scratch area. Anything that lands in
//! the scratch area is appended afterwards, so one edge-triggered wakeup can
//! drain an arbitrarily large receive queue without reserving memory upfront.

use bytes::Bytes;
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::io::AsRawFd;

/// Initial capacity of a freshly created buffer (1 KB).
pub const INITIAL_BUFFER_SIZE: usize = 1024;

/// Size of the stack scratch region used by `fill_from_socket` (64 KB).
pub const SCRATCH_SIZE: usize = 64 * 1024;

/// A contiguous byte window with separate read and write cursors.
///
/// Invariant: `reader_index <= writer_index <= storage.len()`.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    storage: Vec<u8>,
    reader_index: usize,
    writer_index: usize,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteBuffer {
    /// Creates an empty buffer with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_BUFFER_SIZE)
    }

    /// Creates an empty buffer with `capacity` bytes of writable space.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity],
            reader_index: 0,
            writer_index: 0,
        }
    }

    /// Number of bytes waiting to be consumed.
    #[inline]
    pub fn readable_bytes(&self) -> usize {
        self.writer_index - self.reader_index
    }

    /// Number of bytes that can be written without compaction or growth.
    #[inline]
    pub fn writable_bytes(&self) -> usize {
        self.storage.len() - self.writer_index
    }

    /// Number of already-consumed bytes in front of the readable region.
    #[inline]
    pub fn prependable_bytes(&self) -> usize {
        self.reader_index
    }

    /// Total size of the backing storage.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Returns true if there is nothing to read.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.readable_bytes() == 0
    }

    /// The readable region.
    #[inline]
    pub fn peek(&self) -> &[u8] {
        &self.storage[self.reader_index..self.writer_index]
    }

    /// Position of the first CRLF inside the readable region.
    pub fn find_crlf(&self) -> Option<usize> {
        self.peek().windows(2).position(|w| w == b"\r\n")
    }

    /// Appends `data` to the readable region, compacting or growing as needed.
    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        let end = self.writer_index + data.len();
        self.storage[self.writer_index..end].copy_from_slice(data);
        self.writer_index = end;
    }

    /// Consumes `len` bytes from the front of the readable region.
    ///
    /// Asking for more than is readable consumes everything.
    pub fn retrieve(&mut self, len: usize) {
        if len < self.readable_bytes() {
            self.reader_index += len;
        } else {
            self.clear();
        }
    }

    /// Consumes everything and returns it as an owned `Bytes`.
    pub fn retrieve_all(&mut self) -> Bytes {
        let out = Bytes::copy_from_slice(self.peek());
        self.clear();
        out
    }

    /// Consumes everything and returns it as a (lossy) UTF-8 string.
    pub fn retrieve_all_to_string(&mut self) -> String {
        let out = String::from_utf8_lossy(self.peek()).into_owned();
        self.clear();
        out
    }

    /// Resets both cursors without touching the storage.
    #[inline]
    pub fn clear(&mut self) {
        self.reader_index = 0;
        self.writer_index = 0;
    }

    /// Drains a non-blocking socket into the buffer.
    ///
    /// Loops on `readv` until the socket reports `WouldBlock`, returning the
    /// number of bytes read in this call (possibly 0). A clean end-of-stream
    /// with nothing read yields `UnexpectedEof`; end-of-stream after some
    /// bytes returns the count so the caller can still process them. Any
    /// other error is returned as-is.
    pub fn fill_from_socket<S: AsRawFd>(&mut self, socket: &S) -> io::Result<usize> {
        let fd = socket.as_raw_fd();
        // Only ever written by readv; just the filled prefix is read back.
        let mut scratch = MaybeUninit::<[u8; SCRATCH_SIZE]>::uninit();
        let mut total = 0usize;

        loop {
            let writable = self.writable_bytes();
            let iov = [
                libc::iovec {
                    iov_base: self.storage[self.writer_index..].as_mut_ptr() as *mut libc::c_void,
                    iov_len: writable,
                },
                libc::iovec {
                    iov_base: scratch.as_mut_ptr() as *mut libc::c_void,
                    iov_len: SCRATCH_SIZE,
                },
            ];

            // SAFETY: both iovecs point at live, exclusively borrowed memory of
            // the advertised length for the duration of the call.
            let n = unsafe { libc::readv(fd, iov.as_ptr(), iov.len() as libc::c_int) };

            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock => break,
                    io::ErrorKind::Interrupted => continue,
                    _ => return Err(err),
                }
            }

            let n = n as usize;
            if n == 0 {
                if total == 0 {
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
                }
                break;
            }

            if n <= writable {
                self.writer_index += n;
            } else {
                self.writer_index = self.storage.len();
                // SAFETY: readv initialized the first `n - writable` scratch bytes.
                let overflow =
                    unsafe { std::slice::from_raw_parts(scratch.as_ptr() as *const u8, n - writable) };
                self.append(overflow);
            }
            total += n;
        }

        Ok(total)
    }

    /// Makes sure at least `len` bytes can be written at `writer_index`.
    fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() >= len {
            return;
        }

        self.compact();

        if self.writable_bytes() < len {
            let readable = self.readable_bytes();
            self.storage.resize(readable + len, 0);
        }
    }

    /// Slides the readable region to offset 0.
    fn compact(&mut self) {
        if self.reader_index == 0 {
            return;
        }
        let readable = self.readable_bytes();
        self.storage
            .copy_within(self.reader_index..self.writer_index, 0);
        self.reader_index = 0;
        self.writer_index = readable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_append_and_retrieve() {
        let mut buf = ByteBuffer::new();
        buf.append(b"hello world");

        assert_eq!(buf.readable_bytes(), 11);
        assert_eq!(buf.peek(), b"hello world");

        buf.retrieve(6);
        assert_eq!(buf.peek(), b"world");
        assert_eq!(buf.prependable_bytes(), 6);
    }

    #[test]
    fn test_retrieve_more_than_readable_clears() {
        let mut buf = ByteBuffer::new();
        buf.append(b"abc");
        buf.retrieve(100);

        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.prependable_bytes(), 0);
    }

    #[test]
    fn test_retrieve_all() {
        let mut buf = ByteBuffer::new();
        buf.append(b"GET / HTTP/1.1\r\n");

        let out = buf.retrieve_all();
        assert_eq!(out, Bytes::from_static(b"GET / HTTP/1.1\r\n"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_append_compacts_before_growing() {
        let mut buf = ByteBuffer::with_capacity(16);
        buf.append(b"0123456789ab");
        buf.retrieve(10);

        // 4 writable + 10 prependable >= 12, so no reallocation
        buf.append(b"cdefghijklmn");

        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.prependable_bytes(), 0);
        assert_eq!(buf.peek(), b"abcdefghijklmn");
    }

    #[test]
    fn test_append_grows_to_exact_fit() {
        let mut buf = ByteBuffer::with_capacity(8);
        buf.append(b"abcd");
        buf.retrieve(2);
        buf.append(b"0123456789");

        assert_eq!(buf.peek(), b"cd0123456789");
        assert_eq!(buf.capacity(), 12);
        assert_eq!(buf.writable_bytes(), 0);
    }

    #[test]
    fn test_readable_never_underflows() {
        let mut buf = ByteBuffer::with_capacity(4);
        let mut expected: Vec<u8> = Vec::new();

        for round in 0..200usize {
            let chunk: Vec<u8> = (0..(round % 7 + 1)).map(|i| (round + i) as u8).collect();
            buf.append(&chunk);
            expected.extend_from_slice(&chunk);

            let take = round % 5;
            buf.retrieve(take);
            expected.drain(..take.min(expected.len()));

            assert_eq!(buf.readable_bytes(), expected.len());
            assert_eq!(buf.peek(), expected.as_slice());
        }
    }

    #[test]
    fn test_find_crlf() {
        let mut buf = ByteBuffer::new();
        buf.append(b"Host: a\r\nrest");
        assert_eq!(buf.find_crlf(), Some(7));

        buf.retrieve(9);
        assert_eq!(buf.find_crlf(), None);
    }

    #[test]
    fn test_fill_from_socket_overflows_into_scratch() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();

        let payload: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
        tx.write_all(&payload).unwrap();

        let mut buf = ByteBuffer::with_capacity(1024);
        let n = buf.fill_from_socket(&rx).unwrap();

        assert_eq!(n, 2048);
        assert_eq!(buf.readable_bytes(), 2048);
        assert_eq!(buf.peek(), payload.as_slice());
        assert_eq!(&buf.peek()[1020..1030], &payload[1020..1030]);
    }

    #[test]
    fn test_fill_from_socket_would_block_is_ok() {
        let (_tx, rx) = UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();

        let mut buf = ByteBuffer::new();
        assert_eq!(buf.fill_from_socket(&rx).unwrap(), 0);
    }

    #[test]
    fn test_fill_from_socket_eof() {
        let (tx, rx) = UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();
        drop(tx);

        let mut buf = ByteBuffer::new();
        let err = buf.fill_from_socket(&rx).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_fill_from_socket_appends_after_existing_data() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();

        let mut buf = ByteBuffer::with_capacity(8);
        buf.append(b"GET ");
        tx.write_all(b"/index.html HTTP/1.1\r\n").unwrap();

        buf.fill_from_socket(&rx).unwrap();
        assert_eq!(buf.peek(), b"GET /index.html HTTP/1.1\r\n");
    }
}
