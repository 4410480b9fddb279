//! Always-on crawl-request processing loop.
//!
//! Architecturally a single-slot [`Dispatcher`](crate::dispatcher::Dispatcher)
//! that draws work from a persistent external queue instead of a static
//! catalog, and never terminates on its own. One job is read at a time,
//! executed synchronously, and deleted on completion. When the queue is
//! empty the loop sleeps a uniformly-random interval before re-polling, so
//! that many independent loop instances sharing a queue family do not wake
//! and poll in lockstep.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::WorkUnitCatalog;
use crate::dispatcher::{ConfigError, DispatchError, Dispatcher};
use crate::outcome::Outcome;
use crate::queue::{CrawlJob, JobQueue, QueueError};
use crate::recorder::OutcomeRecorder;

const DEFAULT_IDLE_SLEEP_MIN: Duration = Duration::from_secs(5);
const DEFAULT_IDLE_SLEEP_MAX: Duration = Duration::from_secs(30);

/// Unrecoverable error terminating the request loop.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Validated configuration for the request loop's idle behavior.
#[derive(Debug, Clone)]
pub struct RequestLoopConfig {
    pub(crate) idle_sleep_min: Duration,
    pub(crate) idle_sleep_max: Duration,
}

impl RequestLoopConfig {
    /// Configuration with an explicit idle sleep range.
    pub fn new(idle_sleep_min: Duration, idle_sleep_max: Duration) -> Result<Self, ConfigError> {
        let config = Self {
            idle_sleep_min,
            idle_sleep_max,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_sleep_max.is_zero() || self.idle_sleep_min > self.idle_sleep_max {
            return Err(ConfigError::InvalidIdleSleepRange {
                min_ms: self.idle_sleep_min.as_millis() as u64,
                max_ms: self.idle_sleep_max.as_millis() as u64,
            });
        }
        Ok(())
    }
}

impl Default for RequestLoopConfig {
    fn default() -> Self {
        Self {
            idle_sleep_min: DEFAULT_IDLE_SLEEP_MIN,
            idle_sleep_max: DEFAULT_IDLE_SLEEP_MAX,
        }
    }
}

/// Uniformly-random idle interval in `[min, max]`.
///
/// Deliberate deconfliction jitter: fixed intervals would synchronize every
/// loop instance polling the same queue family.
pub fn jittered_interval(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let millis = rand::rng().random_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Executes one crawl job. Job-level failures are handled into an
/// [`Outcome`]; only infrastructure failures propagate.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &CrawlJob) -> Result<Outcome, DispatchError>;
}

/// [`JobHandler`] that resolves jobs against a discovered catalog and runs
/// them through a dispatcher, recording each job under
/// `<output_root>/<receipt>/<spider-id>/`.
pub struct CatalogJobHandler {
    catalog: WorkUnitCatalog,
    dispatcher: Dispatcher,
    output_root: PathBuf,
}

impl CatalogJobHandler {
    /// Handler executing jobs from `catalog` through `dispatcher`.
    pub fn new(catalog: WorkUnitCatalog, dispatcher: Dispatcher, output_root: PathBuf) -> Self {
        Self {
            catalog,
            dispatcher,
            output_root,
        }
    }
}

#[async_trait::async_trait]
impl JobHandler for CatalogJobHandler {
    async fn handle(&self, job: &CrawlJob) -> Result<Outcome, DispatchError> {
        let recorder = OutcomeRecorder::new(self.output_root.join(&job.receipt));
        match self.catalog.get(&job.spider) {
            Some(unit) => {
                let mut report = self.dispatcher.run(vec![unit.clone()], &recorder).await?;
                match report.outcomes.pop() {
                    Some(recorded) => Ok(recorded.outcome),
                    None => Err(DispatchError::MissingOutcome(job.spider.clone())),
                }
            }
            None => {
                let outcome = Outcome::spider_not_found(&job.spider);
                recorder.record(&job.spider, &outcome).await?;
                Ok(outcome)
            }
        }
    }
}

/// The always-on host loop: poll the queue, execute one job at a time,
/// delete processed jobs, sleep a randomized interval when idle.
///
/// Terminates only through its cancellation token (checked once per
/// iteration) or an unrecoverable queue/runtime error.
pub struct CrawlRequestLoop {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: RequestLoopConfig,
    cancel: CancellationToken,
}

impl CrawlRequestLoop {
    /// Create a loop over `queue`, executing jobs through `handler`.
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        config: RequestLoopConfig,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            queue,
            handler,
            config,
            cancel,
        })
    }

    /// Run until cancelled or an unrecoverable error occurs.
    pub async fn run(&self) -> Result<(), LoopError> {
        info!(
            idle_sleep_min_s = self.config.idle_sleep_min.as_secs(),
            idle_sleep_max_s = self.config.idle_sleep_max.as_secs(),
            "crawl request loop started"
        );
        loop {
            if self.cancel.is_cancelled() {
                info!("crawl request loop cancelled");
                return Ok(());
            }

            match self.queue.read_one().await? {
                Some(job) => {
                    info!(spider = %job.spider, receipt = %job.receipt, "crawl job received");
                    let outcome = self.handler.handle(&job).await?;
                    // Delete only after the outcome is durable; a crash in
                    // between means redelivery, which at-least-once accepts.
                    self.queue.delete(&job).await?;
                    info!(
                        spider = %job.spider,
                        status = %outcome.status,
                        duration_ms = outcome.duration.as_millis() as u64,
                        "crawl job processed"
                    );
                }
                None => {
                    let interval =
                        jittered_interval(self.config.idle_sleep_min, self.config.idle_sleep_max);
                    debug!(sleep_ms = interval.as_millis() as u64, "queue empty, idling");
                    tokio::select! {
                        _ = sleep(interval) => {}
                        _ = self.cancel.cancelled() => {}
                    }
                }
            }
        }
    }
}
