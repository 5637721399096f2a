//! Cancellation of blocked reads and writes.

use crate::device::Shared;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, Weak};

/// Interrupts blocking calls on the device that issued it.
///
/// Clones share the same flag. Once fired, every blocked or future call made
/// with the token returns [`Error::Interrupted`](crate::Error::Interrupted)
/// until [`reset`](CancelToken::reset) is called.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    device: Weak<Shared>,
}

impl CancelToken {
    pub(crate) fn new(device: &Arc<Shared>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            device: Arc::downgrade(device),
        }
    }

    /// Fires the token and wakes every waiter on the issuing device.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        if let Some(shared) = self.device.upgrade() {
            // Taking the state lock orders the flag store before any waiter's
            // next condition check, so the wakeup cannot be missed.
            let _guard = shared.state.lock().unwrap_or_else(PoisonError::into_inner);
            shared.readable.notify_all();
            shared.writable.notify_all();
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Re-arms a fired token.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub(crate) fn is_issued_by(&self, shared: &Arc<Shared>) -> bool {
        std::ptr::eq(self.device.as_ptr(), Arc::as_ptr(shared))
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
