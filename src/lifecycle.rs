//! Orchestrator lifecycle.
//!
//! Running → Draining → Stopped. Requests are admitted only while Running;
//! shutdown waits for admitted requests to finish, up to a timeout.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Complete,
    Timeout { remaining: u32 },
}

pub struct Lifecycle {
    state: RwLock<LifecycleState>,
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Running),
            in_flight: Arc::new(AtomicU32::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Admit a request. Returns None once shutdown has begun.
    pub fn admit(&self) -> Option<RequestGuard> {
        // Holding the read lock keeps a concurrent `drain` from observing a
        // zero count between the state check and the increment.
        let state = self.state.read();
        if *state != LifecycleState::Running {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(RequestGuard {
            counter: self.in_flight.clone(),
            notify: self.notify.clone(),
        })
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop admitting requests and wait for in-flight ones to finish.
    pub async fn drain(&self, timeout: Duration) -> DrainOutcome {
        *self.state.write() = LifecycleState::Draining;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            let count = self.in_flight();
            if count == 0 {
                return DrainOutcome::Complete;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return match self.in_flight() {
                    0 => DrainOutcome::Complete,
                    remaining => DrainOutcome::Timeout { remaining },
                };
            }
        }
    }

    pub fn mark_stopped(&self) {
        *self.state.write() = LifecycleState::Stopped;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one admitted request.
pub struct RequestGuard {
    counter: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}
