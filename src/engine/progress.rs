//! Callbacks emitted while a native call runs.
//!
//! Sinks are invoked on the blocking thread that runs the native call, so
//! they must return quickly. The orchestrator wraps every sink so nothing is
//! forwarded once cancellation has been requested for the family.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{CancelSlot, TranscriptSegment};

/// One step of a multi-step native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub step: u32,
    pub total: u32,
}

impl Progress {
    pub fn new(step: u32, total: u32) -> Self {
        Self { step, total }
    }

    /// Completed fraction in `[0, 1]`.
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.step as f32 / self.total as f32).min(1.0)
    }
}

/// Shared callback receiving events of type `E`.
pub struct Sink<E: ?Sized>(Arc<dyn Fn(&E) + Send + Sync>);

/// Per-step progress of diffusion, synthesis and transcription runs.
pub type ProgressSink = Sink<Progress>;
/// Transcript segments as the recognizer finalizes them.
pub type SegmentSink = Sink<TranscriptSegment>;
/// Text pieces as they are sampled.
pub type TokenSink = Sink<str>;

impl<E: ?Sized + 'static> Sink<E> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn emit(&self, event: &E) {
        (self.0)(event)
    }

    /// Stop forwarding once cancellation is requested on `slot`.
    pub fn until_cancelled(self, slot: Arc<CancelSlot>) -> Self {
        Self::new(move |event: &E| {
            if !slot.is_requested() {
                self.emit(event);
            }
        })
    }
}

impl<E: ?Sized> Clone for Sink<E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<E: ?Sized> fmt::Debug for Sink<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sink")
    }
}

/// Async stream of sampled text pieces.
///
/// The channel is unbounded so a native sampling loop never blocks on a slow
/// reader. The stream ends when the generation that owns the sink finishes.
pub struct TokenStream {
    receiver: mpsc::UnboundedReceiver<String>,
}

impl TokenStream {
    /// Create a sink for `TextParams::on_token` and the stream it feeds.
    pub fn channel() -> (TokenSink, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let sink = Sink::new(move |token: &str| {
            // A dropped reader only loses the tail.
            let _ = sender.send(token.to_string());
        });
        (sink, Self { receiver })
    }

    pub async fn next(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Collect every remaining piece.
    pub async fn collect(mut self) -> Vec<String> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next().await {
            tokens.push(token);
        }
        tokens
    }
}
