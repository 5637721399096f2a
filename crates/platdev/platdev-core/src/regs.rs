//! Peripheral register layout and typed access to it.
//!
//! # Layout
//!
//! ```text
//! data window (MEM_SIZE = 4096 bytes)
//! ┌──────────────────────────────────────────────────────────────┐
//! │ payload bytes, offset 0 .. size                              │
//! └──────────────────────────────────────────────────────────────┘
//!
//! register window (REG_SIZE = 8 bytes)
//! ┌──────────────────────────────┬───────────────────────────────┐
//! │ FLAG_REG @0 (u32)            │ SIZE_REG @4 (u32)             │
//! │  bit 0: DATA_READY           │  byte count of the transfer   │
//! │  bit 1: WRITE_READY          │  (0 ..= MEM_SIZE)             │
//! │  other bits: reserved        │                               │
//! └──────────────────────────────┴───────────────────────────────┘
//! ```
//!
//! `DATA_READY` is raised by the peripheral when the data window holds
//! `SIZE_REG` bytes for the device. `WRITE_READY` means the peripheral will
//! accept the next outbound transfer.

use crate::error::WindowError;
use crate::window::{HeapWindow, Window};
use std::fmt;
use std::sync::Arc;

/// Size of the bulk data window.
pub const MEM_SIZE: usize = 0x1000;

/// Size of the control register window (two 32-bit registers).
pub const REG_SIZE: usize = 8;

/// Offset of the flags register.
pub const FLAG_REG: usize = 0;

/// Offset of the transfer size register.
pub const SIZE_REG: usize = 4;

bitflags::bitflags! {
    /// Contents of the flags register. Reserved bits are carried through
    /// unchanged, so read-modify-write cycles never clobber them.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Status: u32 {
        /// The data window holds `SIZE_REG` bytes for the device.
        const DATA_READY = 1;
        /// The peripheral accepts the next outbound transfer.
        const WRITE_READY = 1 << 1;
    }
}

/// The pair of windows a peripheral exposes.
///
/// Cloning is cheap; clones refer to the same windows. A test can keep a clone
/// to play the hardware side while the device drives the other.
#[derive(Clone)]
pub struct Peripheral {
    mem: Arc<dyn Window>,
    regs: Arc<dyn Window>,
}

impl Peripheral {
    pub fn new(mem: Arc<dyn Window>, regs: Arc<dyn Window>) -> Self {
        Self { mem, regs }
    }

    /// A peripheral backed by zeroed heap windows of the standard sizes.
    pub fn heap() -> Self {
        Self::new(
            Arc::new(HeapWindow::new(MEM_SIZE)),
            Arc::new(HeapWindow::new(REG_SIZE)),
        )
    }

    /// Checks that both windows are large enough for the register layout.
    pub fn validate(&self) -> Result<(), WindowError> {
        if self.mem.len() < MEM_SIZE {
            return Err(WindowError::TooSmall {
                len: self.mem.len(),
                required: MEM_SIZE,
            });
        }
        if self.regs.len() < REG_SIZE {
            return Err(WindowError::TooSmall {
                len: self.regs.len(),
                required: REG_SIZE,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn mem(&self) -> &dyn Window {
        &*self.mem
    }

    #[inline]
    pub fn regs(&self) -> &dyn Window {
        &*self.regs
    }

    pub fn status(&self) -> Result<Status, WindowError> {
        self.regs.read32(FLAG_REG).map(Status::from_bits_retain)
    }

    pub fn set_status(&self, status: Status) -> Result<(), WindowError> {
        self.regs.write32(FLAG_REG, status.bits())
    }

    pub fn size(&self) -> Result<u32, WindowError> {
        self.regs.read32(SIZE_REG)
    }

    pub fn set_size(&self, size: u32) -> Result<(), WindowError> {
        self.regs.write32(SIZE_REG, size)
    }

    /// Hardware side: place `bytes` in the data window and raise `DATA_READY`
    /// while keeping the other flag bits.
    pub fn offer(&self, bytes: &[u8]) -> Result<(), WindowError> {
        self.mem.write_bytes(0, bytes)?;
        self.set_size(bytes.len() as u32)?;
        let mut status = self.status()?;
        status.insert(Status::DATA_READY);
        self.set_status(status)
    }
}

impl fmt::Debug for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peripheral")
            .field("mem_len", &self.mem.len())
            .field("regs_len", &self.regs.len())
            .finish()
    }
}
