//! Registry counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe atomic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters kept by one plugin registry.
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    pub registrations: Counter,
    pub plugins_registered: Counter,
    pub manifest_errors: Counter,
    pub loads_started: Counter,
    pub loads_succeeded: Counter,
    pub loads_failed: Counter,
    pub backend_invocations: Counter,
    pub dependency_diagnostics: Counter,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_registration(&self, added: usize, errors: usize) {
        self.registrations.inc();
        self.plugins_registered.add(added as u64);
        self.manifest_errors.add(errors as u64);
    }

    pub fn record_load_start(&self) {
        self.loads_started.inc();
    }

    pub fn record_load_end(&self, success: bool) {
        if success {
            self.loads_succeeded.inc();
        } else {
            self.loads_failed.inc();
        }
    }

    pub fn record_backend_call(&self) {
        self.backend_invocations.inc();
    }

    pub fn record_diagnostics(&self, count: usize) {
        self.dependency_diagnostics.add(count as u64);
    }

    pub fn snapshot(&self) -> MetricsSummary {
        MetricsSummary::from_metrics(self)
    }
}

/// Point-in-time copy of [`RegistryMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSummary {
    pub registrations: u64,
    pub plugins_registered: u64,
    pub manifest_errors: u64,
    pub loads_started: u64,
    pub loads_succeeded: u64,
    pub loads_failed: u64,
    pub backend_invocations: u64,
    pub dependency_diagnostics: u64,
}

impl MetricsSummary {
    pub fn from_metrics(metrics: &RegistryMetrics) -> Self {
        Self {
            registrations: metrics.registrations.get(),
            plugins_registered: metrics.plugins_registered.get(),
            manifest_errors: metrics.manifest_errors.get(),
            loads_started: metrics.loads_started.get(),
            loads_succeeded: metrics.loads_succeeded.get(),
            loads_failed: metrics.loads_failed.get(),
            backend_invocations: metrics.backend_invocations.get(),
            dependency_diagnostics: metrics.dependency_diagnostics.get(),
        }
    }
}
