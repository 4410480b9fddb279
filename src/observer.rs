//! Observer hooks for dispatch events.

use std::sync::Arc;
use std::time::Duration;

use crate::dispatcher::BatchReport;
use crate::outcome::Outcome;

/// Observer trait for receiving dispatch events.
///
/// Implement this trait to monitor batch progress, collect custom metrics,
/// or wire dispatch events into external systems. All methods default to
/// no-ops, so implementations override only what they care about.
#[async_trait::async_trait]
pub trait DispatchObserver: Send + Sync {
    /// Called when a work unit's execution has been started.
    async fn on_unit_started(&self, _unit_id: &str) {}

    /// Called when a work unit's outcome has been recorded.
    async fn on_unit_finished(&self, _unit_id: &str, _outcome: &Outcome) {}

    /// Called when a work unit exceeded its time budget and was killed. The
    /// recorded timeout outcome is reported through `on_unit_finished` as
    /// well.
    async fn on_unit_timed_out(&self, _unit_id: &str, _elapsed: Duration) {}

    /// Called when the whole batch has completed.
    async fn on_batch_complete(&self, _report: &BatchReport) {}
}

/// Registry for managing multiple dispatch observers.
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn DispatchObserver>>,
}

impl ObserverRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Register an observer to receive dispatch events.
    pub fn register(&mut self, observer: Arc<dyn DispatchObserver>) {
        self.observers.push(observer);
    }

    /// Notify all observers that a unit was started.
    pub async fn notify_unit_started(&self, unit_id: &str) {
        for observer in &self.observers {
            observer.on_unit_started(unit_id).await;
        }
    }

    /// Notify all observers that a unit's outcome was recorded.
    pub async fn notify_unit_finished(&self, unit_id: &str, outcome: &Outcome) {
        for observer in &self.observers {
            observer.on_unit_finished(unit_id, outcome).await;
        }
    }

    /// Notify all observers that a unit was killed over its time budget.
    pub async fn notify_unit_timed_out(&self, unit_id: &str, elapsed: Duration) {
        for observer in &self.observers {
            observer.on_unit_timed_out(unit_id, elapsed).await;
        }
    }

    /// Notify all observers that the batch completed.
    pub async fn notify_batch_complete(&self, report: &BatchReport) {
        for observer in &self.observers {
            observer.on_batch_complete(report).await;
        }
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
