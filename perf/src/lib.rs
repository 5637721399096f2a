//! Shared fixtures for the criterion benches.

use platdev_core::{Device, DeviceOptions, MEM_SIZE, MmapWindow, Peripheral, PollMode, REG_SIZE};
use std::io;
use std::sync::Arc;

pub fn temp_window_path(label: &str) -> String {
    let pid = std::process::id();
    format!("/tmp/platdev_bench_{label}_{pid}")
}

/// Deterministic non-constant payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(7)).collect()
}

/// A device without a poll thread, so benches drive every cycle.
pub fn manual_device(peripheral: Peripheral) -> Device {
    let opts = DeviceOptions {
        poll_mode: PollMode::Manual,
        ..DeviceOptions::default()
    };
    match Device::attach(0, peripheral, opts) {
        Ok(dev) => dev,
        Err(e) => panic!("bench device failed to attach: {e}"),
    }
}

/// File-backed windows under /tmp. Call [`MmapFixture::remove`] when done.
pub struct MmapFixture {
    pub peripheral: Peripheral,
    pub mem_path: String,
    pub regs_path: String,
}

impl MmapFixture {
    pub fn create(label: &str) -> io::Result<Self> {
        let mem_path = temp_window_path(&format!("{label}_mem"));
        let regs_path = temp_window_path(&format!("{label}_regs"));
        let mem = MmapWindow::create(&mem_path, MEM_SIZE)?;
        let regs = MmapWindow::create(&regs_path, REG_SIZE)?;
        Ok(Self {
            peripheral: Peripheral::new(Arc::new(mem), Arc::new(regs)),
            mem_path,
            regs_path,
        })
    }

    pub fn remove(self) {
        let _ = std::fs::remove_file(&self.mem_path);
        let _ = std::fs::remove_file(&self.regs_path);
    }
}
