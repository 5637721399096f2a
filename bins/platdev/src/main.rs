//! Emulator front end: maps the configured window files, attaches a device
//! per peripheral and logs (optionally echoes) everything the peripherals
//! send. Another process plays the peripheral by mapping the same files.

use anyhow::{Context, Result, bail};
use platdev_cdev::{Controller, Handle};
use platdev_config::PlatdevConfig;
use platdev_core::{Error, Fault, MEM_SIZE, MmapWindow, Peripheral, REG_SIZE};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => PlatdevConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => PlatdevConfig::default(),
    };
    init_tracing(&config.log_level);
    info!(?config, "starting platdev");

    let mut peripherals = Vec::with_capacity(config.devices.len());
    for dev in &config.devices {
        let mem = MmapWindow::open_or_create(&dev.mem_path, MEM_SIZE)
            .with_context(|| format!("mapping {}", dev.mem_path.display()))?;
        let regs = MmapWindow::open_or_create(&dev.regs_path, REG_SIZE)
            .with_context(|| format!("mapping {}", dev.regs_path.display()))?;
        peripherals.push(Peripheral::new(Arc::new(mem), Arc::new(regs)));
    }

    let controller = Controller::attach(peripherals, config.to_device_options(), config.max_open)
        .context("attaching devices")?;

    let mut readers = Vec::with_capacity(controller.len());
    for index in 0..controller.len() {
        let handle = controller
            .open(index)
            .with_context(|| format!("opening device {index}"))?;
        let echo = config.echo;
        let reader = thread::Builder::new()
            .name(format!("platdev-reader-{index}"))
            .spawn(move || pump(handle, echo))
            .with_context(|| format!("spawning reader for device {index}"))?;
        readers.push(reader);
    }
    info!(devices = controller.len(), echo = config.echo, "running");

    let mut failed = 0;
    for reader in readers {
        if reader.join().is_err() {
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} reader thread(s) panicked");
    }
    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_thread_names(true)
        .init();
}

/// Receives until the device goes away, echoing back when asked.
fn pump(handle: Handle, echo: bool) {
    let index = handle.index();
    let mut buf = vec![0u8; MEM_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = match handle.recv(&mut buf) {
            Ok(n) => n,
            Err(Error::Interrupted | Error::Fault(Fault::Detached)) => break,
            Err(e) => {
                error!(device = index, error = %e, "read failed");
                break;
            }
        };
        total += n as u64;
        info!(device = index, bytes = n, total, "received");

        if echo {
            let mut rest = &buf[..n];
            while !rest.is_empty() {
                match handle.send(rest) {
                    Ok(sent) => rest = &rest[sent..],
                    Err(e) => {
                        warn!(device = index, error = %e, "echo failed");
                        break;
                    }
                }
            }
        }
    }

    info!(device = index, total, "reader stopped");
}
