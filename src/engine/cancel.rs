//! Cooperative cancellation for in-flight native calls.
//!
//! Each model family owns one `CancelSlot`. A request arms the slot with the
//! hook of the handle it is about to run; `request` sets the flag and fires
//! whatever hook is armed. Nothing here waits for the native call to stop.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use super::CancelHook;

/// Cancellation state for one model family.
#[derive(Default)]
pub struct CancelSlot {
    requested: AtomicBool,
    hook: Mutex<Option<CancelHook>>,
}

impl CancelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns true if a native hook was signalled.
    pub fn request(&self) -> bool {
        self.requested.store(true, Ordering::SeqCst);
        let hook = self.hook.lock().clone();
        match hook {
            Some(hook) => {
                hook();
                true
            }
            None => false,
        }
    }

    /// Whether cancellation was requested since the last reset.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Clear a stale request before a new one starts running.
    pub fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    /// Register the hook of the handle about to run.
    ///
    /// A cancellation requested before the hook existed is forwarded
    /// immediately. The hook is disarmed when the returned guard drops.
    pub fn arm(&self, hook: Option<CancelHook>) -> ArmedCancel<'_> {
        if let Some(hook) = hook {
            *self.hook.lock() = Some(hook.clone());
            if self.is_requested() {
                debug!("forwarding pending cancellation to newly armed handle");
                hook();
            }
        }
        ArmedCancel { slot: self }
    }

    fn disarm(&self) {
        self.hook.lock().take();
    }
}

/// Disarms the family's cancel hook on drop.
pub struct ArmedCancel<'a> {
    slot: &'a CancelSlot,
}

impl Drop for ArmedCancel<'_> {
    fn drop(&mut self) {
        self.slot.disarm();
    }
}
