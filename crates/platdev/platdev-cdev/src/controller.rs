//! Access controller: the device arena and the per-device open cap.

use crate::handle::{Handle, OpenFlags};
use platdev_core::{
    Device, DeviceOptions, Error, Fault, InvalidArgument, MAX_DEVICES, Peripheral, Result,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// One arena entry: a device and the number of handles currently open on it.
pub(crate) struct Slot {
    pub(crate) device: Device,
    pub(crate) open: AtomicUsize,
}

impl Slot {
    pub(crate) fn release(&self) {
        let prev = self.open.fetch_sub(1, Ordering::AcqRel);
        debug!(device = self.device.index(), open = prev - 1, "handle closed");
    }
}

/// Owns the attached devices and hands out [`Handle`]s to them.
///
/// Device `i` is the `i`-th peripheral passed to [`Controller::attach`].
/// Dropping the controller detaches every device; handles still open after
/// that fail with [`Fault::Detached`].
pub struct Controller {
    slots: Vec<Arc<Slot>>,
    max_open: usize,
}

impl Controller {
    /// Attaches one device per peripheral, all with the same options.
    ///
    /// Devices attached before a failure are detached again.
    pub fn attach<I>(peripherals: I, options: DeviceOptions, max_open: usize) -> Result<Self>
    where
        I: IntoIterator<Item = Peripheral>,
    {
        let mut slots = Vec::with_capacity(MAX_DEVICES);
        for (index, peripheral) in peripherals.into_iter().enumerate() {
            if index >= MAX_DEVICES {
                return Err(InvalidArgument::TooManyDevices { max: MAX_DEVICES }.into());
            }
            let device = Device::attach(index, peripheral, options)?;
            slots.push(Arc::new(Slot {
                device,
                open: AtomicUsize::new(0),
            }));
        }
        info!(devices = slots.len(), max_open, "controller ready");
        Ok(Self { slots, max_open })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn max_open(&self) -> usize {
        self.max_open
    }

    pub fn device(&self, index: usize) -> Option<&Device> {
        self.slots.get(index).map(|slot| &slot.device)
    }

    /// Handles currently open on device `index`.
    pub fn open_count(&self, index: usize) -> Option<usize> {
        self.slots
            .get(index)
            .map(|slot| slot.open.load(Ordering::Acquire))
    }

    /// Opens a blocking handle on device `index`.
    pub fn open(&self, index: usize) -> Result<Handle> {
        self.open_with(index, OpenFlags::default())
    }

    /// Opens a handle on device `index`.
    ///
    /// Fails with [`Error::ResourceExhausted`] once `max_open` handles are
    /// open on that device; the count is restored before returning.
    pub fn open_with(&self, index: usize, flags: OpenFlags) -> Result<Handle> {
        let slot = self
            .slots
            .get(index)
            .ok_or(InvalidArgument::NoSuchDevice { index })?;
        if !slot.device.is_attached() {
            return Err(Fault::Detached.into());
        }

        let prev = slot.open.fetch_add(1, Ordering::AcqRel);
        if prev >= self.max_open {
            slot.open.fetch_sub(1, Ordering::AcqRel);
            warn!(device = index, limit = self.max_open, "open limit reached");
            return Err(Error::ResourceExhausted {
                index,
                limit: self.max_open,
            });
        }

        debug!(device = index, open = prev + 1, ?flags, "handle opened");
        Ok(Handle::new(Arc::clone(slot), flags))
    }

    /// Detaches every device. Idempotent.
    pub fn detach_all(&self) {
        for slot in &self.slots {
            slot.device.detach();
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.detach_all();
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("devices", &self.slots.len())
            .field("max_open", &self.max_open)
            .finish()
    }
}
