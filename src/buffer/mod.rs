//! Byte Buffer Module
//!
//! Growable read/write byte window used for both directions of every
//! connection.
//!
//! ## Layout
//!
//! ```text
//! +-------------------+------------------+------------------+
//! | prependable bytes |  readable bytes  |  writable bytes  |
//! |                   |     (CONTENT)    |                  |
//! +-------------------+------------------+------------------+
//! 0       <=      reader_index   <=   writer_index    <=   capacity
//! ```
//!
//! Reading from a socket appends at `writer_index`; consuming parsed bytes
//! advances `reader_index`. When the tail runs out of room the unread region
//! slides back to offset 0 before the storage is ever reallocated.

pub mod byte_buffer;

pub use byte_buffer::{ByteBuffer, INITIAL_BUFFER_SIZE, SCRATCH_SIZE};
