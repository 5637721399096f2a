//! Poll cycles against a register window that faults on demand.

use platdev_core::{
    Device, DeviceOptions, FLAG_REG, HeapWindow, MEM_SIZE, Peripheral, PollMode, REG_SIZE, Status,
    Transfer, Window, WindowError,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Register window whose next `read_faults` 32-bit reads and `flag_write_faults`
/// writes to the flags register fail.
struct FaultyRegs {
    inner: Arc<HeapWindow>,
    read_faults: AtomicUsize,
    flag_write_faults: AtomicUsize,
}

impl FaultyRegs {
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    fn fault(offset: usize) -> WindowError {
        WindowError::OutOfBounds {
            offset,
            width: 4,
            len: REG_SIZE,
        }
    }
}

impl Window for FaultyRegs {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn read8(&self, offset: usize) -> Result<u8, WindowError> {
        self.inner.read8(offset)
    }

    fn write8(&self, offset: usize, value: u8) -> Result<(), WindowError> {
        self.inner.write8(offset, value)
    }

    fn read32(&self, offset: usize) -> Result<u32, WindowError> {
        if Self::take(&self.read_faults) {
            return Err(Self::fault(offset));
        }
        self.inner.read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) -> Result<(), WindowError> {
        if offset == FLAG_REG && Self::take(&self.flag_write_faults) {
            return Err(Self::fault(offset));
        }
        self.inner.write32(offset, value)
    }
}

/// The device sees the faulty registers; the returned peripheral plays the
/// hardware side over the same storage without faults.
fn rig(mode: PollMode) -> (Device, Peripheral, Arc<FaultyRegs>) {
    let mem: Arc<HeapWindow> = Arc::new(HeapWindow::new(MEM_SIZE));
    let regs = Arc::new(HeapWindow::new(REG_SIZE));
    let faulty = Arc::new(FaultyRegs {
        inner: Arc::clone(&regs),
        read_faults: AtomicUsize::new(0),
        flag_write_faults: AtomicUsize::new(0),
    });
    let hw = Peripheral::new(mem.clone(), regs);
    let opts = DeviceOptions {
        poll_mode: mode,
        ..DeviceOptions::default()
    };
    let dev = Device::attach(0, Peripheral::new(mem, faulty.clone()), opts).expect("attach");
    (dev, hw, faulty)
}

#[test]
fn unreadable_status_aborts_the_cycle() {
    let (dev, hw, faulty) = rig(PollMode::Manual);
    hw.offer(&[1, 2, 3]).unwrap();
    faulty.read_faults.store(1, Ordering::Release);

    let report = dev.poll_once();
    assert_eq!(report.inbound, Transfer::Aborted);
    assert_eq!(report.outbound, Transfer::Aborted);
    assert_eq!(dev.buffered().unwrap(), 0);

    assert_eq!(dev.poll_once().inbound, Transfer::Moved(3));
}

/// A faulting flag write leaves the transfer pending and the ring untouched,
/// so the retry delivers it exactly once.
#[test]
fn failed_flag_write_does_not_duplicate_inbound_data() {
    let (dev, hw, faulty) = rig(PollMode::Manual);
    hw.offer(b"once").unwrap();
    faulty.flag_write_faults.store(1, Ordering::Release);

    assert_eq!(dev.poll_once().inbound, Transfer::Aborted);
    assert_eq!(dev.buffered().unwrap(), 0);
    assert!(hw.status().unwrap().contains(Status::DATA_READY));

    assert_eq!(dev.poll_once().inbound, Transfer::Moved(4));
    assert_eq!(dev.buffered().unwrap(), 4);
    assert!(!hw.status().unwrap().contains(Status::DATA_READY));

    // Nothing left to admit.
    assert_eq!(dev.poll_once().inbound, Transfer::Idle);
    assert_eq!(dev.buffered().unwrap(), 4);
}

/// The poll thread keeps rescheduling through a run of faults and drains the
/// transfer once the registers recover.
#[test]
fn poll_thread_survives_transient_faults() {
    let (dev, hw, faulty) = rig(PollMode::Thread);
    faulty.read_faults.store(20, Ordering::Release);
    hw.offer(&[9; 16]).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while hw.status().unwrap().contains(Status::DATA_READY) {
        assert!(Instant::now() < deadline, "poll thread stopped after faults");
        thread::sleep(Duration::from_millis(5));
    }
    // every injected fault was consumed by a cycle before the drain
    assert_eq!(faulty.read_faults.load(Ordering::Acquire), 0);
    assert_eq!(dev.buffered().unwrap(), 16);

    // and it is still polling afterwards
    hw.offer(&[7; 8]).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while dev.buffered().unwrap() < 24 {
        assert!(Instant::now() < deadline, "no cycle after recovery");
        thread::sleep(Duration::from_millis(5));
    }
}
