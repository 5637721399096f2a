//! Device-side data pipeline for an emulated memory-mapped peripheral.
//!
//! The peripheral talks only through a flags register, a size register and a
//! flat data window. A [`Device`] hides that behind blocking `read`/`write`
//! calls: a poll thread moves inbound bytes into a ring buffer and flushes a
//! single staged outbound transfer, all under one lock per device.

mod cancel;
mod device;
mod error;
mod handshake;
mod poll;
mod regs;
mod ring;
mod window;

pub use cancel::CancelToken;
pub use device::{
    DEFAULT_MAX_OPEN, DEFAULT_POLL_INTERVAL_MS, Device, DeviceOptions, IoMode, MAX_DEVICES,
    OversizePolicy, POLL_INTERVAL_MAX_MS, POLL_INTERVAL_MIN_MS, PollMode, poll_interval_from_ms,
};
pub use error::{Error, ErrorKind, Fault, InvalidArgument, Result, WindowError};
pub use handshake::HandshakeBuffer;
pub use poll::{CycleReport, Transfer};
pub use regs::{FLAG_REG, MEM_SIZE, Peripheral, REG_SIZE, SIZE_REG, Status};
pub use ring::{RING_CAPACITY, RingBuffer};
pub use window::{HeapWindow, MmapWindow, Window};
