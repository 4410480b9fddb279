//! Batch execution statistics with real-time broadcasting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;

/// Statistics collected while dispatching work units.
#[derive(Debug, Clone)]
pub struct BatchStats {
    /// Number of work units started.
    pub units_started: usize,
    /// Number of units recorded with status 0.
    pub units_succeeded: usize,
    /// Number of units recorded with a relayed failure status.
    pub units_failed: usize,
    /// Number of units killed over their time budget.
    pub units_timed_out: usize,
    /// When tracking started.
    pub start_time: Instant,
    /// When these stats were last updated.
    pub last_update: Instant,
}

impl BatchStats {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            units_started: 0,
            units_succeeded: 0,
            units_failed: 0,
            units_timed_out: 0,
            start_time: now,
            last_update: now,
        }
    }

    /// Elapsed time since tracking started.
    pub fn elapsed(&self) -> Duration {
        self.last_update.duration_since(self.start_time)
    }

    /// Units recorded so far, across all terminal statuses.
    pub fn units_recorded(&self) -> usize {
        self.units_succeeded + self.units_failed + self.units_timed_out
    }
}

/// Thread-safe statistics tracker with snapshot broadcasting.
///
/// Counters use relaxed atomics; stats are informational and never drive
/// control flow. Subscribers receive a fresh snapshot after every update.
pub struct StatsTracker {
    units_started: AtomicUsize,
    units_succeeded: AtomicUsize,
    units_failed: AtomicUsize,
    units_timed_out: AtomicUsize,
    start_time: Instant,
    tx: watch::Sender<BatchStats>,
}

impl StatsTracker {
    /// Create a new tracker.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(BatchStats::new());
        Self {
            units_started: AtomicUsize::new(0),
            units_succeeded: AtomicUsize::new(0),
            units_failed: AtomicUsize::new(0),
            units_timed_out: AtomicUsize::new(0),
            start_time: Instant::now(),
            tx,
        }
    }

    /// Subscribe to statistics updates.
    pub fn subscribe(&self) -> watch::Receiver<BatchStats> {
        self.tx.subscribe()
    }

    /// Record a unit start.
    pub fn unit_started(&self) {
        self.units_started.fetch_add(1, Ordering::Relaxed);
        self.broadcast();
    }

    /// Record a successful unit.
    pub fn unit_succeeded(&self) {
        self.units_succeeded.fetch_add(1, Ordering::Relaxed);
        self.broadcast();
    }

    /// Record a unit that relayed a failure status.
    pub fn unit_failed(&self) {
        self.units_failed.fetch_add(1, Ordering::Relaxed);
        self.broadcast();
    }

    /// Record a unit killed over its time budget.
    pub fn unit_timed_out(&self) {
        self.units_timed_out.fetch_add(1, Ordering::Relaxed);
        self.broadcast();
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> BatchStats {
        BatchStats {
            units_started: self.units_started.load(Ordering::Relaxed),
            units_succeeded: self.units_succeeded.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            units_timed_out: self.units_timed_out.load(Ordering::Relaxed),
            start_time: self.start_time,
            last_update: Instant::now(),
        }
    }

    fn broadcast(&self) {
        // send_replace never fails, even with no subscribers.
        self.tx.send_replace(self.snapshot());
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}
