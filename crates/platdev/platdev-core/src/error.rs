//! Error taxonomy shared by the device core and the handle layer.

use std::io;

/// Faults raised by a register or memory window accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("{width}-byte access at offset {offset:#x} exceeds a {len}-byte window")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },

    #[error("32-bit access at unaligned offset {offset:#x}")]
    Misaligned { offset: usize },

    #[error("window of {len} bytes is smaller than the required {required} bytes")]
    TooSmall { len: usize, required: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidArgument {
    #[error("poll interval {ms} ms is outside [{min}, {max}] ms")]
    PollInterval { ms: u32, min: u32, max: u32 },

    #[error("unrecognized control command {code:#010x}")]
    UnknownCommand { code: u32 },

    #[error("write of {len} bytes exceeds the {capacity}-byte handshake buffer")]
    WriteTooLarge { len: usize, capacity: usize },

    #[error("no device at index {index}")]
    NoSuchDevice { index: usize },

    #[error("at most {max} devices can be attached")]
    TooManyDevices { max: usize },

    #[error("cancel token was issued by another device")]
    ForeignCancelToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("peripheral window fault: {0}")]
    Window(#[from] WindowError),

    #[error("device state lock poisoned")]
    Poisoned,

    #[error("failed to spawn the poll thread")]
    PollThread,

    #[error("device has been detached")]
    Detached,
}

/// Errors returned to callers of the device core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Non-blocking mode was requested and the operation cannot complete now.
    #[error("operation would block")]
    WouldBlock,

    /// A blocking wait was cancelled.
    #[error("blocking wait interrupted")]
    Interrupted,

    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] InvalidArgument),

    /// The per-device cap on simultaneously open handles is reached.
    #[error("device {index} already has {limit} open handles")]
    ResourceExhausted { index: usize, limit: usize },

    #[error("device fault: {0}")]
    Fault(#[from] Fault),
}

/// Flat classification of [`Error`], independent of the carried context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    WouldBlock,
    Interrupted,
    InvalidArgument,
    ResourceExhausted,
    Fault,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::WouldBlock => ErrorKind::WouldBlock,
            Error::Interrupted => ErrorKind::Interrupted,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Error::Fault(_) => ErrorKind::Fault,
        }
    }
}

impl From<WindowError> for Error {
    fn from(e: WindowError) -> Self {
        Error::Fault(Fault::Window(e))
    }
}

/// A cancelled call maps to `Other`, never `Interrupted`, which `read_exact`
/// and `write_all` retry. The device error stays reachable via `get_ref`.
impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match e.kind() {
            ErrorKind::WouldBlock => io::ErrorKind::WouldBlock,
            ErrorKind::Interrupted => io::ErrorKind::Other,
            ErrorKind::InvalidArgument => io::ErrorKind::InvalidInput,
            ErrorKind::ResourceExhausted => io::ErrorKind::ResourceBusy,
            ErrorKind::Fault => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
