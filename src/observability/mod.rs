//! Metrics for the request orchestration layer.
//!
//! Counters are lock-free and shared through an `Arc` held by the client.
//! Logging goes through `tracing`; no subscriber is installed here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for Airtable operations.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Exchanges sent to the transport, retries included.
    exchanges: AtomicU64,
    /// Exchanges that ended in a retry.
    retries: AtomicU64,
    /// Admissions that had to wait for a rate window slot.
    rate_limit_waits: AtomicU64,
    /// Logical requests that failed terminally.
    failures: AtomicU64,
    /// Batch chunks dispatched.
    chunks: AtomicU64,
    /// List pages fetched.
    pages: AtomicU64,
    /// Total exchange latency in microseconds.
    latency_total_us: AtomicU64,
}

impl Metrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an exchange.
    pub fn record_exchange(&self, latency: Duration) {
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        self.latency_total_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Records a retry.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an admission that waited.
    pub fn record_rate_limit_wait(&self) {
        self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a terminal failure.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dispatched chunk.
    pub fn record_chunk(&self) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a fetched page.
    pub fn record_page(&self) {
        self.pages.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets the exchange count.
    pub fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    /// Gets the retry count.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Gets the average exchange latency in microseconds.
    pub fn average_latency_us(&self) -> u64 {
        let total = self.latency_total_us.load(Ordering::Relaxed);
        match self.exchanges() {
            0 => 0,
            count => total / count,
        }
    }

    /// Gets a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            exchanges: self.exchanges(),
            retries: self.retries(),
            rate_limit_waits: self.rate_limit_waits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            pages: self.pages.load(Ordering::Relaxed),
            average_latency_us: self.average_latency_us(),
        }
    }

    /// Resets all metrics.
    pub fn reset(&self) {
        self.exchanges.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.rate_limit_waits.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.chunks.store(0, Ordering::Relaxed);
        self.pages.store(0, Ordering::Relaxed);
        self.latency_total_us.store(0, Ordering::Relaxed);
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Exchanges sent.
    pub exchanges: u64,
    /// Retries scheduled.
    pub retries: u64,
    /// Admissions that waited.
    pub rate_limit_waits: u64,
    /// Terminal failures.
    pub failures: u64,
    /// Chunks dispatched.
    pub chunks: u64,
    /// Pages fetched.
    pub pages: u64,
    /// Average latency in microseconds.
    pub average_latency_us: u64,
}
