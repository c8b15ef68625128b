//! Owned native model handles.
//!
//! A loaded native model is only ever reachable through a `Box<dyn …Model>`.
//! Closing consumes the box, so a handle cannot be closed twice.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::warn;

use super::EngineError;

/// Fire-and-forget cancellation signal for a running native call.
pub type CancelHook = Arc<dyn Fn() + Send + Sync>;

/// Behaviour shared by every loaded native model.
pub trait NativeModel: Send {
    /// Approximate resident footprint reported by the native layer.
    fn footprint_bytes(&self) -> Option<u64> {
        None
    }

    /// Signal used to interrupt a running call on this handle.
    fn cancel_hook(&self) -> Option<CancelHook> {
        None
    }

    /// Release the native handle.
    fn close(self: Box<Self>) -> Result<(), EngineError>;
}

/// Bound used by the model cache and by [`ResidentModel`].
pub trait ManagedModel: Send {
    fn footprint_bytes(&self) -> Option<u64>;
    fn cancel_hook(&self) -> Option<CancelHook>;
    fn close(self) -> Result<(), EngineError>;
}

impl<M: NativeModel + ?Sized> ManagedModel for Box<M> {
    fn footprint_bytes(&self) -> Option<u64> {
        (**self).footprint_bytes()
    }

    fn cancel_hook(&self) -> Option<CancelHook> {
        (**self).cancel_hook()
    }

    fn close(self) -> Result<(), EngineError> {
        NativeModel::close(self)
    }
}

/// RAII guard for a model that is resident outside of any cache.
///
/// `release` closes explicitly and reports the failure. Dropping the guard
/// on any other path closes the model and logs a failure instead.
pub struct ResidentModel<M: ManagedModel> {
    /// `None` only after the model was handed to `close`.
    model: Option<M>,
    label: &'static str,
}

impl<M: ManagedModel> ResidentModel<M> {
    pub fn new(model: M, label: &'static str) -> Self {
        Self { model: Some(model), label }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Close the model now.
    pub fn release(mut self) -> Result<(), EngineError> {
        match self.model.take() {
            Some(model) => model.close(),
            None => Ok(()),
        }
    }
}

impl<M: ManagedModel> Deref for ResidentModel<M> {
    type Target = M;

    fn deref(&self) -> &M {
        match &self.model {
            Some(model) => model,
            None => unreachable!("resident model accessed after close"),
        }
    }
}

impl<M: ManagedModel> DerefMut for ResidentModel<M> {
    fn deref_mut(&mut self) -> &mut M {
        match &mut self.model {
            Some(model) => model,
            None => unreachable!("resident model accessed after close"),
        }
    }
}

impl<M: ManagedModel> Drop for ResidentModel<M> {
    fn drop(&mut self) {
        let Some(model) = self.model.take() else {
            return;
        };
        if let Err(e) = model.close() {
            warn!(model = self.label, error = %e, "failed to close resident model");
        }
    }
}
