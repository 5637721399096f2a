//! The poll task: bridges peripheral status flags to the device buffers.
//!
//! # Cycle
//!
//! 1. Snapshot the poll interval.
//! 2. Read the flags register.
//! 3. `DATA_READY`: under the state lock, clamp `SIZE_REG` to the data window
//!    and admit the transfer only if the ring has room for all of it. For an
//!    admitted transfer `DATA_READY` is cleared and `WRITE_READY` toggled,
//!    then the bytes are committed to the ring and readers are woken. A
//!    transfer that does not fit is left in place for the next cycle.
//! 4. `WRITE_READY` (as updated by step 3) with a staged write: under the
//!    lock, copy the staged bytes to the data window, write their count to
//!    `SIZE_REG`, clear `WRITE_READY`, and wake writers.
//! 5. Sleep for the snapshotted interval, then repeat.
//!
//! The next cycle starts one interval after the previous one *finished*; a
//! slow cycle delays the ones after it. Only a stop request ends the loop:
//! faults and aborted cycles are logged and the task reschedules.

use crate::device::Shared;
use crate::error::Result;
use crate::regs::{MEM_SIZE, Status};
use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Outcome of one direction of a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// The flag for this direction was not raised, or nothing was staged.
    Idle,
    /// Inbound data did not fit in the ring and was left for a later cycle.
    Deferred { pending: usize, free: usize },
    /// This many bytes were moved.
    Moved(usize),
    /// The cycle gave up on this direction (detach in progress or a fault).
    Aborted,
}

/// What a single poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Delay before the next cycle.
    pub interval: Duration,
    pub inbound: Transfer,
    pub outbound: Transfer,
}

pub(crate) fn run_cycle(shared: &Shared) -> CycleReport {
    let mut scratch = shared.cycle.lock().unwrap_or_else(PoisonError::into_inner);

    let interval = match shared.lock() {
        Ok(state) => state.poll_interval,
        Err(_) => shared.fallback_interval,
    };
    let mut report = CycleReport {
        interval,
        inbound: Transfer::Idle,
        outbound: Transfer::Idle,
    };

    let mut status = match shared.peripheral.status() {
        Ok(status) => status,
        Err(e) => {
            warn!(device = shared.index, error = %e, "failed to read status register");
            report.inbound = Transfer::Aborted;
            report.outbound = Transfer::Aborted;
            return report;
        }
    };
    trace!(device = shared.index, ?status, "poll");

    if status.contains(Status::DATA_READY) {
        report.inbound = settle(shared, "inbound", drain_inbound(shared, &mut scratch, &mut status));
    }

    if status.contains(Status::WRITE_READY) {
        report.outbound = settle(shared, "outbound", flush_outbound(shared, &mut status));
    }

    report
}

fn settle(shared: &Shared, direction: &str, result: Result<Transfer>) -> Transfer {
    match result {
        Ok(transfer) => transfer,
        Err(e) => {
            warn!(device = shared.index, direction, error = %e, "poll cycle aborted");
            Transfer::Aborted
        }
    }
}

fn drain_inbound(shared: &Shared, scratch: &mut [u8], status: &mut Status) -> Result<Transfer> {
    if shared.is_closed() {
        return Ok(Transfer::Aborted);
    }
    let mut state = shared.lock()?;

    let pending = (shared.peripheral.size()? as usize).min(MEM_SIZE);
    let free = state.ring.space_free();
    if free < pending {
        debug!(device = shared.index, pending, free, "inbound transfer deferred");
        return Ok(Transfer::Deferred { pending, free });
    }

    let chunk = &mut scratch[..pending];
    shared.peripheral.mem().read_bytes(0, chunk)?;

    // WRITE_READY flips after every inbound transfer, even with nothing staged.
    let mut next = *status;
    next.remove(Status::DATA_READY);
    next.toggle(Status::WRITE_READY);
    // Flags first: if the write faults, DATA_READY stays raised and the ring
    // is untouched, so the retry cannot duplicate the transfer.
    shared.peripheral.set_status(next)?;
    *status = next;
    let pushed = state.ring.push(chunk);
    debug_assert!(pushed, "admission checked under the same lock");
    drop(state);

    shared.readable.notify_all();
    debug!(device = shared.index, bytes = pending, "inbound transfer");
    Ok(Transfer::Moved(pending))
}

fn flush_outbound(shared: &Shared, status: &mut Status) -> Result<Transfer> {
    if shared.is_closed() {
        return Ok(Transfer::Aborted);
    }
    let mut state = shared.lock()?;

    let Some(n) = state.handshake.drain(shared.peripheral.mem())? else {
        return Ok(Transfer::Idle);
    };
    shared.peripheral.set_size(n as u32)?;
    status.remove(Status::WRITE_READY);
    shared.peripheral.set_status(*status)?;
    drop(state);

    shared.writable.notify_all();
    debug!(device = shared.index, bytes = n, "outbound transfer");
    Ok(Transfer::Moved(n))
}

/// Stop request shared between a device and its poll thread.
struct StopSignal {
    stopped: Mutex<bool>,
    cvar: Condvar,
}

impl StopSignal {
    /// Sleeps for `timeout` or until stopped. Returns `true` when stopped.
    fn sleep(&self, timeout: Duration) -> bool {
        let guard = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    fn raise(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cvar.notify_all();
    }
}

/// Handle to a device's background poll thread.
pub(crate) struct PollTask {
    stop: Arc<StopSignal>,
    thread: JoinHandle<()>,
}

impl PollTask {
    /// Starts the poll thread. The first cycle runs immediately.
    pub(crate) fn spawn(shared: Arc<Shared>) -> io::Result<Self> {
        let stop = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            cvar: Condvar::new(),
        });
        let signal = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name(format!("platdev-poll-{}", shared.index))
            .spawn(move || {
                let mut delay = Duration::ZERO;
                while !signal.sleep(delay) {
                    delay = run_cycle(&shared).interval;
                }
                debug!(device = shared.index, "poll thread stopped");
            })?;
        Ok(Self { stop, thread })
    }

    /// Prevents further cycles and waits for the current one to finish.
    pub(crate) fn stop(self) {
        self.stop.raise();
        if self.thread.join().is_err() {
            warn!("poll thread panicked");
        }
    }
}
