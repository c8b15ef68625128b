//! System memory queries.
//!
//! The oracle is read-only and may be called without holding any family lock.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Source of current system memory figures, in MB.
pub trait MemoryOracle: Send + Sync {
    /// Memory currently available to this process.
    fn available_mb(&self) -> u64;

    /// Total physical memory on the device.
    fn total_mb(&self) -> u64;
}

/// Oracle backed by the operating system via `sysinfo`.
pub struct SystemMemoryOracle {
    sys: Mutex<System>,
}

impl SystemMemoryOracle {
    pub fn new() -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        Self { sys: Mutex::new(sys) }
    }
}

impl Default for SystemMemoryOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOracle for SystemMemoryOracle {
    fn available_mb(&self) -> u64 {
        let mut sys = self.sys.lock();
        sys.refresh_memory();
        // sysinfo reports 0 where available memory is unknown; fall back to
        // free memory so the guard does not reject every load.
        let available = match sys.available_memory() {
            0 => sys.free_memory(),
            n => n,
        };
        available / BYTES_PER_MB
    }

    fn total_mb(&self) -> u64 {
        self.sys.lock().total_memory() / BYTES_PER_MB
    }
}

/// Oracle returning caller-controlled values.
#[derive(Debug)]
pub struct FixedMemoryOracle {
    available_mb: AtomicU64,
    total_mb: AtomicU64,
}

impl FixedMemoryOracle {
    pub fn new(available_mb: u64, total_mb: u64) -> Self {
        Self {
            available_mb: AtomicU64::new(available_mb),
            total_mb: AtomicU64::new(total_mb),
        }
    }

    pub fn set_available_mb(&self, mb: u64) {
        self.available_mb.store(mb, Ordering::SeqCst);
    }

    pub fn set_total_mb(&self, mb: u64) {
        self.total_mb.store(mb, Ordering::SeqCst);
    }
}

impl MemoryOracle for FixedMemoryOracle {
    fn available_mb(&self) -> u64 {
        self.available_mb.load(Ordering::SeqCst)
    }

    fn total_mb(&self) -> u64 {
        self.total_mb.load(Ordering::SeqCst)
    }
}
