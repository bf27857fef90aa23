//! Structured span definitions for tracing.

use std::time::Instant;
use tracing::{Level, Span, field, span};

pub fn register_span(paths: usize) -> Span {
    span!(
        Level::INFO,
        "plugin.register",
        paths = paths,
        added = field::Empty,
        errors = field::Empty,
    )
}

/// Span around one plugin load, recording its outcome and duration.
pub struct LoadSpan {
    span: Span,
    start: Instant,
}

impl LoadSpan {
    pub fn new(plugin: &str, kind: &str) -> Self {
        let span = span!(
            Level::INFO,
            "plugin.load",
            plugin = plugin,
            kind = kind,
            success = field::Empty,
            duration_ms = field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
        }
    }

    pub fn finish(self, success: bool) {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        self.span.record("success", success);
        self.span.record("duration_ms", duration_ms);
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}
