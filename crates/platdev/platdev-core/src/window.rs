//! Register and memory window accessors.
//!
//! The device never touches hardware directly. Everything it knows about the
//! peripheral goes through a [`Window`]: a flat, byte-addressed range that
//! supports 8-bit and aligned 32-bit reads and writes. Two backings exist:
//!
//! - [`HeapWindow`]: zero-initialised process memory. Each access is atomic,
//!   so a test thread can act as the peripheral while the poll task runs.
//! - [`MmapWindow`]: a memory-mapped file accessed with volatile loads and
//!   stores, so another process can act as the peripheral.
//!
//! 32-bit values are little-endian in both backings.

use crate::error::WindowError;
use platdev_mmap::MmapFileMut;
use std::io;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Byte and word accessors over one address range.
pub trait Window: Send + Sync {
    /// Size of the window in bytes.
    fn len(&self) -> usize;

    fn read8(&self, offset: usize) -> Result<u8, WindowError>;

    fn write8(&self, offset: usize, value: u8) -> Result<(), WindowError>;

    /// Reads the little-endian word at `offset`, which must be 4-byte aligned.
    fn read32(&self, offset: usize) -> Result<u32, WindowError>;

    /// Writes a little-endian word at `offset`, which must be 4-byte aligned.
    fn write32(&self, offset: usize, value: u32) -> Result<(), WindowError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `out.len()` bytes starting at `offset` into `out`.
    ///
    /// The whole range is bounds-checked before the first byte is read.
    fn read_bytes(&self, offset: usize, out: &mut [u8]) -> Result<(), WindowError> {
        check_range(offset, out.len(), self.len())?;
        for (i, b) in out.iter_mut().enumerate() {
            *b = self.read8(offset + i)?;
        }
        Ok(())
    }

    /// Copies `bytes` into the window starting at `offset`.
    ///
    /// The whole range is bounds-checked before the first byte is written.
    fn write_bytes(&self, offset: usize, bytes: &[u8]) -> Result<(), WindowError> {
        check_range(offset, bytes.len(), self.len())?;
        for (i, &b) in bytes.iter().enumerate() {
            self.write8(offset + i, b)?;
        }
        Ok(())
    }
}

#[inline]
fn check_range(offset: usize, width: usize, len: usize) -> Result<(), WindowError> {
    match offset.checked_add(width) {
        Some(end) if end <= len => Ok(()),
        _ => Err(WindowError::OutOfBounds { offset, width, len }),
    }
}

#[inline]
fn check_word(offset: usize, len: usize) -> Result<(), WindowError> {
    if offset % 4 != 0 {
        return Err(WindowError::Misaligned { offset });
    }
    check_range(offset, 4, len)
}

/// In-memory window backed by atomic words.
///
/// Byte accesses update a single lane of the containing word with a CAS loop,
/// so concurrent 8-bit and 32-bit accesses never tear.
pub struct HeapWindow {
    words: Box<[AtomicU32]>,
    len: usize,
}

impl HeapWindow {
    /// Creates a zero-filled window of `len` bytes.
    pub fn new(len: usize) -> Self {
        let words = (0..len.div_ceil(4)).map(|_| AtomicU32::new(0)).collect();
        Self { words, len }
    }

    /// Returns a copy of the full window contents.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        for (i, b) in out.iter_mut().enumerate() {
            *b = self.lane(i);
        }
        out
    }

    #[inline]
    fn lane(&self, offset: usize) -> u8 {
        let word = self.words[offset / 4].load(Ordering::Acquire);
        (word >> ((offset % 4) * 8)) as u8
    }
}

impl Window for HeapWindow {
    fn len(&self) -> usize {
        self.len
    }

    fn read8(&self, offset: usize) -> Result<u8, WindowError> {
        check_range(offset, 1, self.len)?;
        Ok(self.lane(offset))
    }

    fn write8(&self, offset: usize, value: u8) -> Result<(), WindowError> {
        check_range(offset, 1, self.len)?;
        let shift = (offset % 4) * 8;
        let mask = !(0xFFu32 << shift);
        let lane = (value as u32) << shift;
        // The closure always returns Some, so the update cannot fail.
        let _ = self.words[offset / 4].fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
            Some((w & mask) | lane)
        });
        Ok(())
    }

    fn read32(&self, offset: usize) -> Result<u32, WindowError> {
        check_word(offset, self.len)?;
        Ok(self.words[offset / 4].load(Ordering::Acquire))
    }

    fn write32(&self, offset: usize, value: u32) -> Result<(), WindowError> {
        check_word(offset, self.len)?;
        self.words[offset / 4].store(value, Ordering::Release);
        Ok(())
    }
}

/// Window over a memory-mapped file.
pub struct MmapWindow {
    /// Owns the mapping; `base` is only valid while this is alive.
    _mm: MmapFileMut,
    base: *mut u8,
    len: usize,
}

// SAFETY: every access through `base` is bounds-checked and volatile, and the
// mapping outlives `base` because both are owned by the same struct. The
// memory is shared with another process anyway, so no access can assume
// exclusivity.
unsafe impl Send for MmapWindow {}
unsafe impl Sync for MmapWindow {}

impl MmapWindow {
    /// Maps `path` as a window of `len` bytes, creating the file when missing.
    pub fn open_or_create<P: AsRef<Path>>(path: P, len: usize) -> io::Result<Self> {
        let mut mm = MmapFileMut::open_or_create_rw(path, len as u64)?;
        let base = mm.as_mut_ptr();
        Ok(Self { _mm: mm, base, len })
    }

    /// Maps `path` as a zero-filled window of `len` bytes, truncating any
    /// previous contents.
    pub fn create<P: AsRef<Path>>(path: P, len: usize) -> io::Result<Self> {
        let mut mm = MmapFileMut::create_rw(path, len as u64)?;
        let base = mm.as_mut_ptr();
        Ok(Self { _mm: mm, base, len })
    }
}

impl Window for MmapWindow {
    fn len(&self) -> usize {
        self.len
    }

    fn read8(&self, offset: usize) -> Result<u8, WindowError> {
        check_range(offset, 1, self.len)?;
        // SAFETY: offset is within the mapping
        Ok(unsafe { ptr::read_volatile(self.base.add(offset)) })
    }

    fn write8(&self, offset: usize, value: u8) -> Result<(), WindowError> {
        check_range(offset, 1, self.len)?;
        // SAFETY: offset is within the mapping
        unsafe { ptr::write_volatile(self.base.add(offset), value) };
        Ok(())
    }

    fn read32(&self, offset: usize) -> Result<u32, WindowError> {
        check_word(offset, self.len)?;
        // SAFETY: in bounds, and 4-byte aligned because the mapping is page aligned
        let raw = unsafe { ptr::read_volatile(self.base.add(offset) as *const u32) };
        Ok(u32::from_le(raw))
    }

    fn write32(&self, offset: usize, value: u32) -> Result<(), WindowError> {
        check_word(offset, self.len)?;
        // SAFETY: in bounds, and 4-byte aligned because the mapping is page aligned
        unsafe { ptr::write_volatile(self.base.add(offset) as *mut u32, value.to_le()) };
        Ok(())
    }
}
