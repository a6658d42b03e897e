//! Atomic counters for engine observability.
//!
//! All counters use relaxed ordering; they are diagnostic, not
//! synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every session of a registry.
pub struct EngineMetrics {
    /// Observations accepted by `ingest`.
    pub samples_ingested: AtomicU64,
    /// Observations older than the retention horizon, dropped.
    pub samples_stale: AtomicU64,
    /// Observations with non-finite or negative values clamped to 0.
    pub samples_clamped: AtomicU64,
    /// Ticks appended to a trajectory.
    pub ticks_evaluated: AtomicU64,
    /// Appended ticks whose decision is flagged invalid.
    pub ticks_degraded: AtomicU64,
    /// Ticks refused (non-monotonic time); trajectory untouched.
    pub ticks_rejected: AtomicU64,
    /// Ticks whose arrival rate was flagged anomalous.
    pub anomalies_flagged: AtomicU64,
    pub sessions_created: AtomicU64,
    pub sessions_removed: AtomicU64,
}

impl EngineMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            samples_ingested: AtomicU64::new(0),
            samples_stale: AtomicU64::new(0),
            samples_clamped: AtomicU64::new(0),
            ticks_evaluated: AtomicU64::new(0),
            ticks_degraded: AtomicU64::new(0),
            ticks_rejected: AtomicU64::new(0),
            anomalies_flagged: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_removed: AtomicU64::new(0),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_ingested: Self::get(&self.samples_ingested),
            samples_stale: Self::get(&self.samples_stale),
            samples_clamped: Self::get(&self.samples_clamped),
            ticks_evaluated: Self::get(&self.ticks_evaluated),
            ticks_degraded: Self::get(&self.ticks_degraded),
            ticks_rejected: Self::get(&self.ticks_rejected),
            anomalies_flagged: Self::get(&self.anomalies_flagged),
            sessions_created: Self::get(&self.sessions_created),
            sessions_removed: Self::get(&self.sessions_removed),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.snapshot().fmt(f)
    }
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub samples_ingested: u64,
    pub samples_stale: u64,
    pub samples_clamped: u64,
    pub ticks_evaluated: u64,
    pub ticks_degraded: u64,
    pub ticks_rejected: u64,
    pub anomalies_flagged: u64,
    pub sessions_created: u64,
    pub sessions_removed: u64,
}
