//! Lifecycle control of one isolated execution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::outcome::{DebugBundle, DebugPaths, Outcome, OutputDocument};
use crate::runtime::{RuntimeError, SandboxRuntime};
use crate::unit::WorkUnit;

/// The isolated environment for a work unit could not be created.
#[derive(Debug, thiserror::Error)]
#[error("failed to create isolated environment for work unit '{unit_id}'")]
pub struct StartError {
    pub unit_id: String,
    #[source]
    pub source: RuntimeError,
}

/// Errors collecting the output of a run.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// `collect_output` is only valid once the run has started.
    #[error("work unit '{0}' was never started")]
    NotStarted(String),

    /// The environment runtime could not be reached.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// One execution attempt of a [`WorkUnit`] inside a disposable environment.
///
/// A handle is created by the dispatcher, driven through
/// `{not-started -> running -> finished}` (or `running -> killed`), handed to
/// the recorder for persistence, and then torn down. It caches no state
/// beyond the execution-context id and the start timestamp; every other
/// operation is one command against the environment runtime.
pub struct RunHandle {
    runtime: Arc<dyn SandboxRuntime>,
    unit: WorkUnit,
    context_id: Option<String>,
    started_at: Option<Instant>,
}

impl RunHandle {
    /// Create a handle for one not-yet-started execution attempt.
    pub fn new(runtime: Arc<dyn SandboxRuntime>, unit: WorkUnit) -> Self {
        Self {
            runtime,
            unit,
            context_id: None,
            started_at: None,
        }
    }

    /// The work unit this handle executes.
    pub fn unit(&self) -> &WorkUnit {
        &self.unit
    }

    /// The execution-context id, once started.
    pub fn context_id(&self) -> Option<&str> {
        self.context_id.as_deref()
    }

    /// Start the execution: run the unit's image with its entry file as the
    /// sole argument.
    ///
    /// Idempotent: after the first successful start, further calls return the
    /// existing execution-context id without creating a second environment.
    pub async fn start(&mut self) -> Result<String, StartError> {
        if let Some(context) = &self.context_id {
            return Ok(context.clone());
        }
        let args = vec![self.unit.absolute_filename.clone()];
        let context = self
            .runtime
            .launch(&self.unit.image, &args)
            .await
            .map_err(|source| StartError {
                unit_id: self.unit.id.clone(),
                source,
            })?;
        debug!(unit = %self.unit.id, context = %context, "work unit started");
        self.started_at = Some(Instant::now());
        self.context_id = Some(context.clone());
        Ok(context)
    }

    /// Whether the execution has reached a terminal state. Returns `false`
    /// for a handle that was never started.
    pub async fn is_finished(&self) -> Result<bool, RuntimeError> {
        match &self.context_id {
            Some(context) => Ok(!self.runtime.is_running(context).await?),
            None => Ok(false),
        }
    }

    /// Forcibly terminate the execution.
    ///
    /// No-op returning `false` when the handle was never started or the
    /// execution already finished; returns `true` after an actual kill.
    pub async fn kill(&mut self) -> Result<bool, RuntimeError> {
        let Some(context) = self.context_id.clone() else {
            return Ok(false);
        };
        if !self.runtime.is_running(&context).await? {
            return Ok(false);
        }
        self.runtime.kill(&context).await?;
        debug!(unit = %self.unit.id, context = %context, "work unit killed");
        Ok(true)
    }

    /// Time since the execution started, `None` if it never did.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|started| started.elapsed())
    }

    /// Collect the finished execution's result.
    ///
    /// Parses the single JSON document the unit is expected to print to
    /// standard output and pulls the `_debug` artifacts it references out of
    /// the environment's filesystem, inlining their bytes. Non-JSON or empty
    /// output indicates a crash and yields a "crawl threw exception" outcome.
    /// Artifact extraction is best effort; a missing artifact never fails
    /// collection.
    pub async fn collect_output(&self) -> Result<Outcome, CollectError> {
        let context = self
            .context_id
            .as_deref()
            .ok_or_else(|| CollectError::NotStarted(self.unit.id.clone()))?;
        let duration = self.elapsed().unwrap_or_default();
        let stdout = self.runtime.stdout(context).await?;

        let document: OutputDocument = match serde_json::from_str(stdout.trim()) {
            Ok(document) => document,
            Err(err) => {
                warn!(unit = %self.unit.id, error = %err, "work unit produced no parseable output");
                let message = if stdout.trim().is_empty() {
                    "work unit exited without printing an output document".to_string()
                } else {
                    format!("work unit output was not a valid result document: {err}")
                };
                return Ok(Outcome::crashed(message, duration));
            }
        };

        let debug = self.fetch_debug(context, document.debug.as_ref()).await;
        Ok(Outcome::from_document(document, debug, duration))
    }

    /// Best-effort extraction of whatever debug artifacts the environment
    /// still holds. Used directly for killed units, whose output document
    /// never names any artifact paths.
    pub async fn collect_debug(&self) -> DebugBundle {
        match self.context_id.as_deref() {
            Some(context) => match self.runtime.stdout(context).await {
                Ok(stdout) => match serde_json::from_str::<OutputDocument>(stdout.trim()) {
                    Ok(document) => self.fetch_debug(context, document.debug.as_ref()).await,
                    Err(_) => DebugBundle::default(),
                },
                Err(err) => {
                    warn!(unit = %self.unit.id, error = %err, "could not read output for debug extraction");
                    DebugBundle::default()
                }
            },
            None => DebugBundle::default(),
        }
    }

    async fn fetch_debug(&self, context: &str, paths: Option<&DebugPaths>) -> DebugBundle {
        let Some(paths) = paths else {
            return DebugBundle::default();
        };
        DebugBundle {
            screenshot: self.fetch_artifact(context, paths.screenshot.as_deref()).await,
            crawl_log: self.fetch_artifact(context, paths.crawl_log.as_deref()).await,
            chrome_driver_log: self
                .fetch_artifact(context, paths.chrome_driver_log.as_deref())
                .await,
        }
    }

    async fn fetch_artifact(&self, context: &str, path: Option<&str>) -> Option<Vec<u8>> {
        let path = path?;
        match self.runtime.read_file(context, path).await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(unit = %self.unit.id, path, error = %err, "debug artifact unavailable");
                None
            }
        }
    }

    /// Tear down the underlying environment. Best effort: teardown failures
    /// are logged, not propagated, since the outcome is already captured.
    pub async fn teardown(self) {
        if let Some(context) = &self.context_id
            && let Err(err) = self.runtime.remove(context).await
        {
            warn!(unit = %self.unit.id, context = %context, error = %err, "environment teardown failed");
        }
    }
}
