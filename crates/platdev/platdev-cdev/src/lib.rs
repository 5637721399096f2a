//! Character-device style access to attached peripherals: an arena of
//! devices with a per-device open cap, handles that read and write through
//! the device core, and ioctl-encoded control commands.

mod command;
mod controller;
mod handle;

pub use command::{COMMAND_TYPE, Command, MAX_COMMAND_NR, SET_POLL_INTERVAL};
pub use controller::Controller;
pub use platdev_core::{DEFAULT_MAX_OPEN, MAX_DEVICES};
pub use handle::{Handle, OpenFlags};
