//! Control command codes.
//!
//! Codes use the classic ioctl packing:
//!
//! ```text
//!  31 30 | 29 ........ 16 | 15 ..... 8 | 7 ...... 0
//!   dir  |   arg size    |    type    |   number
//! ```

use platdev_core::{InvalidArgument, Result};

const NR_BITS: u32 = 8;
const TYPE_BITS: u32 = 8;
const SIZE_BITS: u32 = 14;

const NR_SHIFT: u32 = 0;
const TYPE_SHIFT: u32 = NR_SHIFT + NR_BITS;
const SIZE_SHIFT: u32 = TYPE_SHIFT + TYPE_BITS;
const DIR_SHIFT: u32 = SIZE_SHIFT + SIZE_BITS;

/// Userspace writes the argument to the device.
const DIR_WRITE: u32 = 1;

/// Type byte shared by every command of this device.
pub const COMMAND_TYPE: u8 = b'V';

/// Highest command number in use.
pub const MAX_COMMAND_NR: u8 = 1;

const fn encode(dir: u32, ty: u8, nr: u8, size: usize) -> u32 {
    (dir << DIR_SHIFT) | ((size as u32) << SIZE_SHIFT) | ((ty as u32) << TYPE_SHIFT) | ((nr as u32) << NR_SHIFT)
}

const fn field(code: u32, shift: u32, bits: u32) -> u32 {
    (code >> shift) & ((1 << bits) - 1)
}

/// Sets the poll interval in milliseconds; the argument is a `u32`.
pub const SET_POLL_INTERVAL: u32 = encode(DIR_WRITE, COMMAND_TYPE, 1, size_of::<u32>());

/// A decoded control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetPollInterval { ms: u32 },
}

impl Command {
    /// Decodes `code` with its 32-bit argument.
    ///
    /// Codes of another type, with a number above [`MAX_COMMAND_NR`], or
    /// whose direction and size do not match a known command are rejected
    /// with [`InvalidArgument::UnknownCommand`].
    pub fn decode(code: u32, arg: u32) -> Result<Self> {
        let unknown = InvalidArgument::UnknownCommand { code };
        if field(code, TYPE_SHIFT, TYPE_BITS) != COMMAND_TYPE as u32 {
            return Err(unknown.into());
        }
        if field(code, NR_SHIFT, NR_BITS) > MAX_COMMAND_NR as u32 {
            return Err(unknown.into());
        }
        match code {
            SET_POLL_INTERVAL => Ok(Command::SetPollInterval { ms: arg }),
            _ => Err(unknown.into()),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Command::SetPollInterval { .. } => SET_POLL_INTERVAL,
        }
    }

    pub fn arg(&self) -> u32 {
        match *self {
            Command::SetPollInterval { ms } => ms,
        }
    }
}
