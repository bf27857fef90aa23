//! Structured tracing and counters for registration and loading.
//!
//! Every registry owns a [`RegistryMetrics`]; `PlugRegistry::metrics()`
//! returns a [`MetricsSummary`] snapshot. Spans are named `plugin.register`
//! and `plugin.load` so a subscriber can filter on them.

mod metrics;
mod spans;

pub use metrics::{Counter, MetricsSummary, RegistryMetrics};
pub use spans::{LoadSpan, register_span};
