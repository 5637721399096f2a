//! Inbound byte ring and its cursor arithmetic.
//!
//! The ring holds bytes pulled from the peripheral until a caller reads them.
//! One slot is always left empty, so:
//! - `read == write` means empty
//! - at most `capacity - 1` bytes are held
//!
//! # Example
//!
//! With `capacity = 8`, after pushing 6 bytes and popping 4:
//!
//! ```text
//!   index:  0   1   2   3   4   5   6   7
//!         [ . | . | . | . | x | x | . | . ]
//!                           ^       ^
//!                         read    write
//!
//! held       = (write + cap - read) % cap = 2
//! space_free = (read + cap - write) % cap - 1 = 5
//! ```
//!
//! Pushing 5 more bytes wraps `write` to index 3. A pop then returns only the
//! bytes up to the physical end (indices 4..8); the rest comes from a second
//! pop starting at index 0.

/// Capacity of the inbound ring, in bytes.
pub const RING_CAPACITY: usize = 5 * 1024;

/// Fixed-capacity circular byte buffer with separate read and write cursors.
pub struct RingBuffer {
    buf: Box<[u8]>,
    read: usize,
    write: usize,
}

impl RingBuffer {
    /// Creates a zeroed ring of `capacity` slots (holding `capacity - 1` bytes).
    ///
    /// # Panics
    /// Panics if `capacity < 2`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "ring capacity must be at least 2");
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Number of bytes currently held.
    #[inline]
    pub fn len(&self) -> usize {
        let cap = self.capacity();
        (self.write + cap - self.read) % cap
    }

    /// Number of bytes that can be pushed without overwriting unread data.
    ///
    /// `space_free() + len() == capacity() - 1` always holds.
    #[inline]
    pub fn space_free(&self) -> usize {
        let cap = self.capacity();
        if self.read == self.write {
            return cap - 1;
        }
        ((self.read + cap - self.write) % cap) - 1
    }

    /// Bytes readable in one pop: up to `write`, or up to the physical end of
    /// the buffer when `write` has wrapped behind `read`.
    #[inline]
    pub fn contiguous(&self) -> usize {
        if self.write >= self.read {
            self.write - self.read
        } else {
            self.capacity() - self.read
        }
    }

    /// Appends all of `bytes`, or nothing if they do not fit.
    ///
    /// Returns `false` and leaves the ring untouched when
    /// `bytes.len() > space_free()`.
    #[must_use]
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.space_free() {
            return false;
        }
        let cap = self.capacity();
        let first = bytes.len().min(cap - self.write);
        let (head, tail) = bytes.split_at(first);
        self.buf[self.write..self.write + head.len()].copy_from_slice(head);
        self.buf[..tail.len()].copy_from_slice(tail);
        self.write = (self.write + bytes.len()) % cap;
        true
    }

    /// Copies up to `out.len()` contiguous bytes into `out` and consumes them.
    ///
    /// Never crosses the physical end of the buffer, so draining a wrapped
    /// ring takes two calls. Returns 0 when the ring is empty.
    pub fn pop(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.contiguous());
        out[..n].copy_from_slice(&self.buf[self.read..self.read + n]);
        self.read += n;
        if self.read == self.capacity() {
            self.read = 0;
        }
        n
    }
}
