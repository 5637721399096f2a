//! Open handles: blocking reads and writes, control commands and cancellation
//! for one device.

use crate::command::Command;
use crate::controller::Slot;
use platdev_core::{CancelToken, IoMode, Result};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Per-handle open flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    /// Fail with `WouldBlock` instead of waiting for data or buffer space.
    pub nonblocking: bool,
}

impl OpenFlags {
    pub fn nonblocking() -> Self {
        Self { nonblocking: true }
    }

    fn io_mode(self) -> IoMode {
        if self.nonblocking {
            IoMode::NonBlocking
        } else {
            IoMode::Blocking
        }
    }
}

/// An open handle on one device. Closing (dropping) it frees its slot.
///
/// `recv`/`send` take `&self`, so one handle can be shared between a reader
/// and a writer thread. The `io::Read`/`io::Write` impls map device errors
/// through `io::Error`; a cancelled call surfaces as `io::ErrorKind::Other`
/// wrapping `Error::Interrupted`.
pub struct Handle {
    slot: Arc<Slot>,
    flags: OpenFlags,
    cancel: CancelToken,
}

impl Handle {
    pub(crate) fn new(slot: Arc<Slot>, flags: OpenFlags) -> Self {
        let cancel = slot.device.cancel_token();
        Self { slot, flags, cancel }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.slot.device.index()
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.flags.nonblocking = nonblocking;
    }

    /// Reads inbound bytes. Never returns `Ok(0)` for a non-empty `buf`.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.slot.device.read(buf, self.flags.io_mode(), &self.cancel)
    }

    /// Stages `bytes` for the peripheral; may stage fewer than given.
    pub fn send(&self, bytes: &[u8]) -> Result<usize> {
        self.slot.device.write(bytes, self.flags.io_mode(), &self.cancel)
    }

    /// Executes an encoded control command.
    pub fn control(&self, code: u32, arg: u32) -> Result<()> {
        match Command::decode(code, arg)? {
            Command::SetPollInterval { ms } => self.set_poll_interval(ms),
        }
    }

    pub fn set_poll_interval(&self, ms: u32) -> Result<()> {
        self.slot.device.set_poll_interval(ms)
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        self.slot.device.poll_interval()
    }

    /// A token that interrupts this handle's blocked `recv`/`send` calls,
    /// to be fired from another thread.
    pub fn canceller(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl io::Read for &Handle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.recv(buf)?)
    }
}

impl io::Read for Handle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl io::Write for &Handle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.send(buf)?)
    }

    /// Staged bytes belong to the device once `write` returns.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for Handle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self).flush()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.slot.release();
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("device", &self.index())
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::command::SET_POLL_INTERVAL;
    use crate::controller::Controller;
    use crate::handle::OpenFlags;
    use platdev_core::{
        DeviceOptions, Error, InvalidArgument, Peripheral, PollMode, Status, Transfer, Window,
    };
    use std::io::{ErrorKind, Read, Write};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    const BOUND: Duration = Duration::from_secs(2);

    fn is_cancellation(e: &std::io::Error) -> bool {
        e.kind() != ErrorKind::Interrupted
            && e.get_ref().and_then(|r| r.downcast_ref::<Error>()) == Some(&Error::Interrupted)
    }

    fn controller() -> Controller {
        let opts = DeviceOptions {
            poll_mode: PollMode::Manual,
            ..DeviceOptions::default()
        };
        Controller::attach([Peripheral::heap()], opts, 2).unwrap()
    }

    #[test]
    fn control_sets_the_poll_interval() {
        let ctl = controller();
        let h = ctl.open(0).unwrap();
        h.control(SET_POLL_INTERVAL, 500).unwrap();
        assert_eq!(h.poll_interval().unwrap(), Duration::from_millis(500));

        assert!(matches!(
            h.control(SET_POLL_INTERVAL, 5),
            Err(Error::InvalidArgument(InvalidArgument::PollInterval { ms: 5, .. }))
        ));
        assert_eq!(
            h.control(0x1234, 500),
            Err(Error::InvalidArgument(InvalidArgument::UnknownCommand { code: 0x1234 }))
        );
        assert_eq!(h.poll_interval().unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn io_traits_move_bytes_both_ways() {
        let ctl = controller();
        let dev = ctl.device(0).unwrap();
        let p = dev.peripheral().clone();
        let mut h = ctl.open(0).unwrap();

        p.offer(b"ping").unwrap();
        dev.poll_once();
        let mut buf = [0u8; 16];
        let n = h.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        // inbound toggled WRITE_READY off; raise it so the write drains
        p.set_status(Status::WRITE_READY).unwrap();
        h.write_all(b"pong").unwrap();
        h.flush().unwrap();
        assert_eq!(dev.poll_once().outbound, Transfer::Moved(4));
        let mut out = [0u8; 4];
        p.mem().read_bytes(0, &mut out).unwrap();
        assert_eq!(&out, b"pong");
    }

    #[test]
    fn nonblocking_handle_reports_would_block() {
        let ctl = controller();
        let mut h = ctl.open_with(0, OpenFlags::nonblocking()).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(h.read(&mut buf).unwrap_err().kind(), ErrorKind::WouldBlock);

        h.set_nonblocking(false);
        assert!(!h.flags().nonblocking);
    }

    #[test]
    fn canceller_interrupts_a_blocked_recv() {
        let ctl = controller();
        let h = ctl.open(0).unwrap();
        let cancel = h.canceller();

        std::thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut buf = [0u8; 4];
                h.recv(&mut buf)
            });
            std::thread::sleep(Duration::from_millis(50));
            cancel.cancel();
            assert_eq!(reader.join().unwrap(), Err(Error::Interrupted));
        });
    }

    #[test]
    fn handles_on_one_device_cancel_independently() {
        let ctl = controller();
        let a = ctl.open(0).unwrap();
        let b = ctl.open(0).unwrap();
        a.canceller().cancel();

        let mut buf = [0u8; 1];
        assert_eq!(a.recv(&mut buf), Err(Error::Interrupted));
        let mut b = b;
        b.set_nonblocking(true);
        assert_eq!(b.recv(&mut buf), Err(Error::WouldBlock));
    }

    /// `read_exact` gives up on a cancelled handle instead of retrying forever.
    #[test]
    fn read_exact_returns_once_cancelled() {
        let ctl = controller();
        let h = ctl.open(0).unwrap();
        let cancel = h.canceller();

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = [0u8; 4];
            tx.send((&h).read_exact(&mut buf)).ok();
        });

        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        let err = rx.recv_timeout(BOUND).expect("read_exact still blocked").unwrap_err();
        assert!(is_cancellation(&err), "{err:?}");
    }

    #[test]
    fn write_all_returns_once_cancelled() {
        let ctl = controller();
        let h = ctl.open(0).unwrap();
        // occupy the single staging slot so the next write has to wait
        assert_eq!(h.send(&[1]), Ok(1));
        let cancel = h.canceller();

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            tx.send((&h).write_all(b"blocked")).ok();
        });

        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        let err = rx.recv_timeout(BOUND).expect("write_all still blocked").unwrap_err();
        assert!(is_cancellation(&err), "{err:?}");
        assert!(ctl.device(0).unwrap().write_pending().unwrap());
    }
}
