//! Bounded-concurrency, time-boxed execution of work-unit batches.
//!
//! The dispatcher is a single-task cooperative polling loop: it multiplexes
//! several out-of-process executions from one control task, never blocking
//! indefinitely. Each poll iteration reaps finished handles (recording their
//! outcomes in completion order), kills handles over the time budget, tops
//! the running set back up to the concurrency limit in FIFO submission
//! order, then sleeps one fixed quantum. The underlying environment status
//! check is itself a poll against an external system, so an event-driven
//! wait would buy nothing here.
//!
//! No individual work-unit failure aborts a batch; every unit gets exactly
//! one recorded outcome. Only infrastructure failures (the environment
//! runtime unreachable, an environment that cannot be created, a recording
//! that cannot be written) propagate and abort the remaining units.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handle::{CollectError, RunHandle, StartError};
use crate::observer::{DispatchObserver, ObserverRegistry};
use crate::outcome::Outcome;
use crate::recorder::{OutcomeRecorder, RecordError};
use crate::runtime::{RuntimeError, SandboxRuntime};
use crate::stats::StatsTracker;
use crate::unit::WorkUnit;

// Concurrency defaults to one: isolated environments sharing a host have
// shown reliability problems above a single concurrent instance. The limit
// stays configurable since that observation may not generalize.
const DEFAULT_CONCURRENCY_LIMIT: usize = 1;
const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors that can occur during dispatcher or request-loop configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Concurrency limit must be greater than 0.
    #[error("concurrency limit must be greater than 0, got {0}")]
    InvalidConcurrencyLimit(usize),

    /// The per-unit time budget must be non-zero.
    #[error("time limit must be non-zero")]
    InvalidTimeLimit,

    /// The poll quantum must be non-zero.
    #[error("poll interval must be non-zero")]
    InvalidPollInterval,

    /// The idle sleep range must satisfy `min <= max`, `max` non-zero.
    #[error("invalid idle sleep range: min {min_ms}ms, max {max_ms}ms")]
    InvalidIdleSleepRange { min_ms: u64, max_ms: u64 },
}

/// Infrastructure failure aborting a batch. Reported, not retried: once the
/// substrate is unavailable no meaningful partial progress is possible.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    Record(#[from] RecordError),

    /// A batch finished without recording an outcome for the named unit.
    #[error("no outcome recorded for work unit '{0}'")]
    MissingOutcome(String),
}

/// Validated configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub(crate) concurrency_limit: usize,
    pub(crate) time_limit: Duration,
    pub(crate) poll_interval: Duration,
}

impl DispatcherConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::InvalidConcurrencyLimit(0));
        }
        if self.time_limit.is_zero() {
            return Err(ConfigError::InvalidTimeLimit);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(())
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            time_limit: DEFAULT_TIME_LIMIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// One recorded outcome inside a [`BatchReport`].
#[derive(Debug, Clone)]
pub struct RecordedOutcome {
    pub unit_id: String,
    pub outcome: Outcome,
    /// Directory the outcome was persisted to.
    pub dir: PathBuf,
}

/// Everything a finished batch recorded, in completion order.
///
/// Completion order reflects finish time, not submission order: units start
/// FIFO, but nothing constrains which finishes first.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<RecordedOutcome>,
}

impl BatchReport {
    /// Number of recorded outcomes.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Count of units recorded with status 0.
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|r| r.outcome.status.is_success())
            .count()
    }

    /// Count of units recorded with any failure status.
    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    /// Count of units killed over their time budget.
    pub fn timed_out(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|r| matches!(r.outcome.status, crate::status::CrawlStatus::RanTooLong))
            .count()
    }
}

/// Runs batches of work units under a concurrency bound and per-unit time
/// budget, recording one outcome per unit as executions finish.
pub struct Dispatcher {
    config: DispatcherConfig,
    runtime: Arc<dyn SandboxRuntime>,
    observers: Arc<ObserverRegistry>,
    stats: Arc<StatsTracker>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher builder for custom configuration.
    pub fn builder(runtime: Arc<dyn SandboxRuntime>) -> DispatcherBuilder {
        DispatcherBuilder::new(runtime)
    }

    /// The statistics tracker, for snapshots or subscriptions.
    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.stats
    }

    /// Run `work_units` to completion, recording each outcome through
    /// `recorder` as it becomes available. Returns the recorded outcomes in
    /// completion order.
    pub async fn run(
        &self,
        work_units: Vec<WorkUnit>,
        recorder: &OutcomeRecorder,
    ) -> Result<BatchReport, DispatchError> {
        self.run_internal(work_units, recorder, None).await
    }

    /// Like [`Dispatcher::run`], observing a cancellation token once per poll
    /// iteration. On cancellation, no further units start; in-flight units
    /// are killed and recorded (a cancelled unit is never silently dropped),
    /// and units that never started get no outcome.
    pub async fn run_with_cancellation(
        &self,
        work_units: Vec<WorkUnit>,
        recorder: &OutcomeRecorder,
        cancel: CancellationToken,
    ) -> Result<BatchReport, DispatchError> {
        self.run_internal(work_units, recorder, Some(cancel)).await
    }

    async fn run_internal(
        &self,
        work_units: Vec<WorkUnit>,
        recorder: &OutcomeRecorder,
        cancel: Option<CancellationToken>,
    ) -> Result<BatchReport, DispatchError> {
        info!(
            units = work_units.len(),
            concurrency_limit = self.config.concurrency_limit,
            time_limit_s = self.config.time_limit.as_secs(),
            "dispatching batch"
        );

        let mut pending: VecDeque<WorkUnit> = work_units.into();
        let mut running: Vec<RunHandle> = Vec::new();
        let mut report = BatchReport::default();

        loop {
            if let Some(token) = &cancel
                && token.is_cancelled()
            {
                warn!(
                    in_flight = running.len(),
                    never_started = pending.len(),
                    "batch cancelled"
                );
                for handle in running.drain(..) {
                    self.reap_overdue(handle, recorder, &mut report).await?;
                }
                pending.clear();
                break;
            }

            // Reap: record finished handles, kill overdue ones.
            let mut still_running = Vec::with_capacity(running.len());
            for handle in running.drain(..) {
                if handle.is_finished().await? {
                    let outcome = handle.collect_output().await?;
                    self.record_finished(handle, outcome, recorder, &mut report)
                        .await?;
                } else if handle.elapsed().unwrap_or_default() > self.config.time_limit {
                    self.reap_overdue(handle, recorder, &mut report).await?;
                } else {
                    still_running.push(handle);
                }
            }
            running = still_running;

            // Launch: top the running set back up, FIFO.
            while running.len() < self.config.concurrency_limit {
                let Some(unit) = pending.pop_front() else {
                    break;
                };
                let mut handle = RunHandle::new(self.runtime.clone(), unit);
                handle.start().await?;
                let unit_id = handle.unit().id.clone();
                debug!(unit = %unit_id, "work unit dispatched");
                self.stats.unit_started();
                self.observers.notify_unit_started(&unit_id).await;
                running.push(handle);
            }

            if pending.is_empty() && running.is_empty() {
                break;
            }

            sleep(self.config.poll_interval).await;
        }

        info!(
            recorded = report.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            timed_out = report.timed_out(),
            "batch complete"
        );
        self.observers.notify_batch_complete(&report).await;
        Ok(report)
    }

    /// Kill an over-budget (or cancelled) handle and record a timeout
    /// outcome, with best-effort extraction of whatever debug artifacts the
    /// environment still holds.
    async fn reap_overdue(
        &self,
        mut handle: RunHandle,
        recorder: &OutcomeRecorder,
        report: &mut BatchReport,
    ) -> Result<(), DispatchError> {
        let unit_id = handle.unit().id.clone();
        let elapsed = handle.elapsed().unwrap_or_default();
        if let Err(err) = handle.kill().await {
            // The unit may have finished in the window since the last poll;
            // the timeout outcome still stands.
            warn!(unit = %unit_id, error = %err, "kill failed");
        }
        warn!(
            unit = %unit_id,
            elapsed_s = elapsed.as_secs(),
            "work unit ran too long, killed"
        );
        self.observers.notify_unit_timed_out(&unit_id, elapsed).await;

        let debug = handle.collect_debug().await;
        let outcome = Outcome::ran_too_long(elapsed).with_debug(debug);
        self.record_finished(handle, outcome, recorder, report).await
    }

    /// Persist one terminal outcome, notify observers, update stats, and
    /// tear the environment down.
    async fn record_finished(
        &self,
        handle: RunHandle,
        outcome: Outcome,
        recorder: &OutcomeRecorder,
        report: &mut BatchReport,
    ) -> Result<(), DispatchError> {
        let unit_id = handle.unit().id.clone();
        let dir = recorder.record(&unit_id, &outcome).await?;
        handle.teardown().await;

        match outcome.status {
            crate::status::CrawlStatus::Success => self.stats.unit_succeeded(),
            crate::status::CrawlStatus::RanTooLong => self.stats.unit_timed_out(),
            _ => self.stats.unit_failed(),
        }
        self.observers.notify_unit_finished(&unit_id, &outcome).await;

        report.outcomes.push(RecordedOutcome {
            unit_id,
            outcome,
            dir,
        });
        Ok(())
    }
}

/// Builder for configuring a [`Dispatcher`].
pub struct DispatcherBuilder {
    runtime: Arc<dyn SandboxRuntime>,
    config: DispatcherConfig,
    observers: Vec<Arc<dyn DispatchObserver>>,
}

impl DispatcherBuilder {
    /// Create a builder with default settings on top of `runtime`.
    pub fn new(runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self {
            runtime,
            config: DispatcherConfig::default(),
            observers: Vec::new(),
        }
    }

    /// Maximum number of concurrently-running work units (default: 1).
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.config.concurrency_limit = limit;
        self
    }

    /// Per-unit wall-clock budget before a forcible kill (default: 60s).
    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.config.time_limit = limit;
        self
    }

    /// Sleep quantum between poll iterations (default: 1s).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Register an observer to receive dispatch events.
    pub fn observe_with(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Build the dispatcher with the configured settings.
    pub fn build(self) -> Result<Dispatcher, ConfigError> {
        self.config.validate()?;
        let mut registry = ObserverRegistry::new();
        for observer in self.observers {
            registry.register(observer);
        }
        Ok(Dispatcher {
            config: self.config,
            runtime: self.runtime,
            observers: Arc::new(registry),
            stats: Arc::new(StatsTracker::new()),
        })
    }
}
