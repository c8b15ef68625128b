//! Span utilities for generation requests.

use tracing::{info_span, Span};
use uuid::Uuid;

use crate::engine::ModelFamily;

/// Extension trait for recording outcomes on spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for generation request spans.
pub struct GenerationSpan;

impl GenerationSpan {
    /// Create a span for one generation request.
    ///
    /// `cache_hit`, `status`, `error.message` and `latency_ms` are filled
    /// in as the request progresses.
    pub fn new(family: ModelFamily, operation: &'static str) -> Span {
        let request_id = Uuid::new_v4();
        info_span!(
            "generation_request",
            request_id = %request_id,
            family = family.as_str(),
            operation,
            cache_key = tracing::field::Empty,
            cache_hit = tracing::field::Empty,
            sequential = tracing::field::Empty,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}
