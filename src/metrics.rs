#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Optional scheduler counters, updated from the hot paths with relaxed
/// atomics.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct SchedulerMetrics {
    /// Draws enqueued by the API thread.
    pub draws_submitted: AtomicU64,
    /// Draws fully retired (ring tail advances).
    pub draws_retired: AtomicU64,
    /// Successful front-end claims.
    pub fe_claims: AtomicU64,
    /// Macrotiles locked and drained by the back end.
    pub tiles_drained: AtomicU64,
    /// Macrotile try-lock failures (tile held by another worker).
    pub tile_lock_failures: AtomicU64,
    /// Compute work groups executed.
    pub compute_groups: AtomicU64,
    /// Times a worker woke from the condition variable.
    pub worker_wakeups: AtomicU64,
    /// When metrics collection started.
    pub start_time: Instant,
}

#[cfg(feature = "metrics")]
impl SchedulerMetrics {
    pub fn new() -> Self {
        Self {
            draws_submitted: AtomicU64::new(0),
            draws_retired: AtomicU64::new(0),
            fe_claims: AtomicU64::new(0),
            tiles_drained: AtomicU64::new(0),
            tile_lock_failures: AtomicU64::new(0),
            compute_groups: AtomicU64::new(0),
            worker_wakeups: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            draws_submitted: self.draws_submitted.load(Ordering::Relaxed),
            draws_retired: self.draws_retired.load(Ordering::Relaxed),
            fe_claims: self.fe_claims.load(Ordering::Relaxed),
            tiles_drained: self.tiles_drained.load(Ordering::Relaxed),
            tile_lock_failures: self.tile_lock_failures.load(Ordering::Relaxed),
            compute_groups: self.compute_groups.load(Ordering::Relaxed),
            worker_wakeups: self.worker_wakeups.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(feature = "metrics")]
impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub draws_submitted: u64,
    pub draws_retired: u64,
    pub fe_claims: u64,
    pub tiles_drained: u64,
    pub tile_lock_failures: u64,
    pub compute_groups: u64,
    pub worker_wakeups: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Draws in flight implied by the counters (submitted - retired).
    pub fn draws_in_flight(&self) -> i64 {
        self.draws_submitted as i64 - self.draws_retired as i64
    }

    /// Retired draws per second since collection started.
    pub fn draws_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.draws_retired as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }
}
