//! Single-slot outbound staging buffer.
//!
//! A caller's write is copied here and marked busy; the poll task later copies
//! it into the peripheral's data window and releases the slot. Only one
//! transfer can be staged at a time.

use crate::error::WindowError;
use crate::window::Window;

pub struct HandshakeBuffer {
    payload: Box<[u8]>,
    pending: usize,
    busy: bool,
}

impl HandshakeBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            payload: vec![0u8; capacity].into_boxed_slice(),
            pending: 0,
            busy: false,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Length of the staged transfer, 0 when idle.
    #[inline]
    pub fn pending_len(&self) -> usize {
        if self.busy { self.pending } else { 0 }
    }

    /// Stages up to `capacity()` bytes of `bytes` and marks the slot busy.
    ///
    /// Returns the number of bytes staged, which is less than `bytes.len()`
    /// when the input is larger than the buffer. Returns `None` without
    /// touching the slot if a transfer is already staged.
    pub fn stage(&mut self, bytes: &[u8]) -> Option<usize> {
        if self.busy {
            return None;
        }
        let n = bytes.len().min(self.capacity());
        self.payload[..n].copy_from_slice(&bytes[..n]);
        self.pending = n;
        self.busy = true;
        Some(n)
    }

    /// Copies the staged bytes to the start of `mem` and releases the slot.
    ///
    /// Returns the number of bytes copied, or `None` if nothing was staged. On
    /// a window fault the slot stays busy so the transfer can be retried.
    pub fn drain(&mut self, mem: &dyn Window) -> Result<Option<usize>, WindowError> {
        if !self.busy {
            return Ok(None);
        }
        mem.write_bytes(0, &self.payload[..self.pending])?;
        self.busy = false;
        Ok(Some(self.pending))
    }
}
