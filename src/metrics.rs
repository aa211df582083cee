use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Iteration latency aggregates over a stage's lifetime
#[derive(Debug, Default)]
pub struct LatencyStats {
    samples: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl LatencyStats {
    /// Record one full iteration
    pub fn record(&self, elapsed: Duration) {
        let nanos = elapsed.as_nanos() as u64;
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Mean iteration latency in microseconds
    pub fn mean_us(&self) -> f64 {
        let samples = self.samples();
        if samples == 0 {
            return 0.0;
        }
        self.total_nanos.load(Ordering::Relaxed) as f64 / samples as f64 / 1000.0
    }

    /// Worst iteration latency in microseconds
    pub fn max_us(&self) -> f64 {
        self.max_nanos.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// Per-stage counters, shared between the stage thread and its owner.
///
/// A consumer stage records one `received` per withdrawn item; a producer
/// stage records one `published` per deposited item. `invocations` counts
/// individual operator calls, so a stage hosting a chain advances it by
/// one per chain entry per iteration.
#[derive(Debug, Default)]
pub struct StageMetrics {
    received: AtomicU64,
    invocations: AtomicU64,
    published: AtomicU64,
    completions: AtomicU64,
    errors: AtomicU64,
    latency: LatencyStats,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invocation(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, elapsed: Duration) {
        self.latency.record(elapsed);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn completions(&self) -> u64 {
        self.completions.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn latency(&self) -> &LatencyStats {
        &self.latency
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received(),
            invocations: self.invocations(),
            published: self.published(),
            completions: self.completions(),
            errors: self.errors(),
            latency_samples: self.latency.samples(),
            latency_mean_us: self.latency.mean_us(),
            latency_max_us: self.latency.max_us(),
        }
    }
}

/// A snapshot of stage metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub invocations: u64,
    pub published: u64,
    pub completions: u64,
    pub errors: u64,
    pub latency_samples: u64,
    pub latency_mean_us: f64,
    pub latency_max_us: f64,
}

impl MetricsSnapshot {
    /// Format as a human-readable one-liner
    pub fn format(&self) -> String {
        format!(
            "Received: {}, Invocations: {}, Published: {}, Completions: {}, Errors: {}, \
             Latency mean: {:.2}µs, max: {:.2}µs over {} iterations",
            self.received,
            self.invocations,
            self.published,
            self.completions,
            self.errors,
            self.latency_mean_us,
            self.latency_max_us,
            self.latency_samples
        )
    }
}
