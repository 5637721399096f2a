//! Device core: the synchronized aggregate of ring, handshake buffer and poll
//! task for one peripheral.
//!
//! # Locking
//!
//! A single mutex guards the ring cursors, the handshake slot and the poll
//! interval together. The poll task holds it while moving bytes between the
//! windows and the buffers, so callers are briefly blocked during a transfer.
//! Blocked readers wait on `readable`, blocked writers on `writable`; both
//! release the mutex while asleep and re-check their condition on wakeup.

use crate::cancel::CancelToken;
use crate::error::{Error, Fault, InvalidArgument, Result};
use crate::handshake::HandshakeBuffer;
use crate::poll::{self, CycleReport, PollTask};
use crate::regs::{MEM_SIZE, Peripheral, Status};
use crate::ring::{RING_CAPACITY, RingBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

pub const POLL_INTERVAL_MIN_MS: u32 = 10;
pub const POLL_INTERVAL_MAX_MS: u32 = 10_000;
pub const DEFAULT_POLL_INTERVAL_MS: u32 = POLL_INTERVAL_MIN_MS;

/// Devices one emulator instance drives.
pub const MAX_DEVICES: usize = 2;

/// Default cap on simultaneously open handles per device.
pub const DEFAULT_MAX_OPEN: usize = 2;

/// Whether a call may suspend the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMode {
    #[default]
    Blocking,
    /// Fail with [`Error::WouldBlock`] instead of waiting.
    NonBlocking,
}

/// What to do with a write larger than the handshake buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OversizePolicy {
    /// Stage the first `MEM_SIZE` bytes and report the shorter count.
    #[default]
    Truncate,
    /// Fail with [`InvalidArgument::WriteTooLarge`].
    Reject,
}

/// Who drives poll cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollMode {
    /// A dedicated background thread reschedules itself after every cycle.
    #[default]
    Thread,
    /// No thread; cycles run only through [`Device::poll_once`].
    Manual,
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceOptions {
    pub poll_interval_ms: u32,
    pub oversize: OversizePolicy,
    pub poll_mode: PollMode,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            oversize: OversizePolicy::Truncate,
            poll_mode: PollMode::Thread,
        }
    }
}

/// Converts a poll interval in milliseconds, enforcing the allowed range.
pub fn poll_interval_from_ms(ms: u32) -> Result<Duration> {
    if !(POLL_INTERVAL_MIN_MS..=POLL_INTERVAL_MAX_MS).contains(&ms) {
        return Err(InvalidArgument::PollInterval {
            ms,
            min: POLL_INTERVAL_MIN_MS,
            max: POLL_INTERVAL_MAX_MS,
        }
        .into());
    }
    Ok(Duration::from_millis(ms as u64))
}

pub(crate) struct State {
    pub(crate) ring: RingBuffer,
    pub(crate) handshake: HandshakeBuffer,
    pub(crate) poll_interval: Duration,
}

pub(crate) struct Shared {
    pub(crate) index: usize,
    pub(crate) peripheral: Peripheral,
    pub(crate) oversize: OversizePolicy,
    /// Interval used when the state lock is poisoned and cannot be read.
    pub(crate) fallback_interval: Duration,
    pub(crate) state: Mutex<State>,
    pub(crate) readable: Condvar,
    pub(crate) writable: Condvar,
    pub(crate) closed: AtomicBool,
    /// Scratch for inbound transfers; holding it serializes poll cycles.
    pub(crate) cycle: Mutex<Box<[u8]>>,
}

impl Shared {
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| {
            error!(device = self.index, "device state lock poisoned");
            Error::Fault(Fault::Poisoned)
        })
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// One attached peripheral.
///
/// All methods take `&self`; share a device between threads with `Arc`.
/// Dropping the device detaches it.
pub struct Device {
    shared: Arc<Shared>,
    poll: Mutex<Option<PollTask>>,
}

impl Device {
    /// Attaches to `peripheral`: validates the windows, announces
    /// `WRITE_READY` to the peripheral and starts polling.
    pub fn attach(index: usize, peripheral: Peripheral, options: DeviceOptions) -> Result<Self> {
        peripheral.validate()?;
        let interval = poll_interval_from_ms(options.poll_interval_ms)?;
        peripheral.set_status(Status::WRITE_READY)?;

        let shared = Arc::new(Shared {
            index,
            peripheral,
            oversize: options.oversize,
            fallback_interval: interval,
            state: Mutex::new(State {
                ring: RingBuffer::new(RING_CAPACITY),
                handshake: HandshakeBuffer::new(MEM_SIZE),
                poll_interval: interval,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            closed: AtomicBool::new(false),
            cycle: Mutex::new(vec![0u8; MEM_SIZE].into_boxed_slice()),
        });

        let poll = match options.poll_mode {
            PollMode::Thread => Some(PollTask::spawn(Arc::clone(&shared)).map_err(|e| {
                error!(device = index, error = %e, "failed to spawn poll thread");
                Error::Fault(Fault::PollThread)
            })?),
            PollMode::Manual => None,
        };

        info!(
            device = index,
            interval_ms = options.poll_interval_ms,
            mode = ?options.poll_mode,
            "device attached"
        );

        Ok(Self {
            shared,
            poll: Mutex::new(poll),
        })
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.shared.index
    }

    /// The windows this device drives.
    pub fn peripheral(&self) -> &Peripheral {
        &self.shared.peripheral
    }

    pub fn is_attached(&self) -> bool {
        !self.shared.is_closed()
    }

    /// Issues a token that can interrupt blocking calls on this device.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken::new(&self.shared)
    }

    /// Reads bytes produced by the peripheral into `buf`.
    ///
    /// Blocks until at least one byte is available (unless `mode` is
    /// non-blocking), then returns between 1 and `buf.len()` bytes. A single
    /// call never wraps across the end of the internal ring, so fewer bytes
    /// than are buffered may be returned. An empty `buf` returns `Ok(0)`
    /// immediately.
    pub fn read(&self, buf: &mut [u8], mode: IoMode, cancel: &CancelToken) -> Result<usize> {
        self.check_call(cancel)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.lock()?;
        while state.ring.is_empty() {
            if cancel.is_cancelled() || self.shared.is_closed() {
                return Err(Error::Interrupted);
            }
            if mode == IoMode::NonBlocking {
                return Err(Error::WouldBlock);
            }
            trace!(device = self.index(), "reader waiting for data");
            state = self
                .shared
                .readable
                .wait(state)
                .map_err(|_| Error::Fault(Fault::Poisoned))?;
        }

        let n = state.ring.pop(buf);
        drop(state);

        debug!(device = self.index(), bytes = n, "read");
        Ok(n)
    }

    /// Stages `bytes` for transfer to the peripheral.
    ///
    /// Blocks while a previous write is still staged (unless `mode` is
    /// non-blocking). Returns the number of bytes staged: the volume copied
    /// may be less than requested when `bytes` exceeds the data window and
    /// the oversize policy is [`OversizePolicy::Truncate`].
    pub fn write(&self, bytes: &[u8], mode: IoMode, cancel: &CancelToken) -> Result<usize> {
        self.check_call(cancel)?;
        if bytes.is_empty() {
            return Ok(0);
        }
        if bytes.len() > MEM_SIZE && self.shared.oversize == OversizePolicy::Reject {
            return Err(InvalidArgument::WriteTooLarge {
                len: bytes.len(),
                capacity: MEM_SIZE,
            }
            .into());
        }

        let mut state = self.shared.lock()?;
        loop {
            if let Some(n) = state.handshake.stage(bytes) {
                drop(state);
                if n < bytes.len() {
                    debug!(device = self.index(), requested = bytes.len(), staged = n, "write truncated");
                } else {
                    debug!(device = self.index(), bytes = n, "write staged");
                }
                return Ok(n);
            }
            if cancel.is_cancelled() || self.shared.is_closed() {
                return Err(Error::Interrupted);
            }
            if mode == IoMode::NonBlocking {
                return Err(Error::WouldBlock);
            }
            trace!(device = self.index(), "writer waiting for handshake slot");
            state = self
                .shared
                .writable
                .wait(state)
                .map_err(|_| Error::Fault(Fault::Poisoned))?;
        }
    }

    /// Changes the delay between poll cycles. Takes effect at the next
    /// reschedule.
    pub fn set_poll_interval(&self, ms: u32) -> Result<()> {
        let interval = poll_interval_from_ms(ms).inspect_err(|_| {
            warn!(device = self.index(), interval_ms = ms, "poll interval out of range");
        })?;
        self.shared.lock()?.poll_interval = interval;
        info!(device = self.index(), interval_ms = ms, "poll interval set");
        Ok(())
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        Ok(self.shared.lock()?.poll_interval)
    }

    /// Bytes waiting in the inbound ring.
    pub fn buffered(&self) -> Result<usize> {
        Ok(self.shared.lock()?.ring.len())
    }

    /// Whether an outbound transfer is staged and not yet drained.
    pub fn write_pending(&self) -> Result<bool> {
        Ok(self.shared.lock()?.handshake.is_busy())
    }

    /// Runs one poll cycle on the calling thread.
    ///
    /// Cycles are serialized, so this is safe even while the poll thread is
    /// running; it then simply adds an extra cycle.
    pub fn poll_once(&self) -> CycleReport {
        poll::run_cycle(&self.shared)
    }

    /// Stops polling, waits for an in-flight cycle to finish and interrupts
    /// every blocked caller. Further reads and writes fail with
    /// [`Fault::Detached`]. Idempotent.
    pub fn detach(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let task = self
            .poll
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.stop();
        }

        {
            let _guard = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
            self.shared.readable.notify_all();
            self.shared.writable.notify_all();
        }

        info!(device = self.index(), "device detached");
    }

    fn check_call(&self, cancel: &CancelToken) -> Result<()> {
        if !cancel.is_issued_by(&self.shared) {
            return Err(InvalidArgument::ForeignCancelToken.into());
        }
        if self.shared.is_closed() {
            return Err(Fault::Detached.into());
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("index", &self.shared.index)
            .field("attached", &self.is_attached())
            .finish()
    }
}
