//! # crawlmux
//!
//! Host-side orchestration for containerized crawl spiders.
//!
//! Spiders are deployed as an isolated-environment image. This crate
//! discovers the spiders an image exposes, runs them under a concurrency
//! bound and a per-unit time budget, classifies every result into a fixed
//! status taxonomy, and persists one durable result directory per unit —
//! even for units that crashed or were killed. An always-on variant pulls
//! crawl-request jobs one at a time from an external queue.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use crawlmux::{Dispatcher, DockerRuntime, OutcomeRecorder, WorkUnitCatalog};
//!
//! let runtime = Arc::new(DockerRuntime::new());
//! let catalog = WorkUnitCatalog::discover(runtime.as_ref(), "spiders:latest").await?;
//!
//! let dispatcher = Dispatcher::builder(runtime)
//!     .concurrency_limit(1)
//!     .time_limit(Duration::from_secs(60))
//!     .build()?;
//!
//! let recorder = OutcomeRecorder::new("/var/crawl-output");
//! let report = dispatcher.run(catalog.into_units(), &recorder).await?;
//! println!("{} of {} units succeeded", report.succeeded(), report.len());
//! ```

pub mod catalog;
pub mod dispatcher;
pub mod handle;
pub mod observer;
pub mod outcome;
pub mod queue;
pub mod recorder;
pub mod request_loop;
pub mod runtime;
pub mod stats;
pub mod status;
pub mod unit;

pub use catalog::{DiscoveryError, INTROSPECTION_ARG, WorkUnitCatalog};
pub use dispatcher::{
    BatchReport, ConfigError, DispatchError, Dispatcher, DispatcherBuilder, RecordedOutcome,
};
pub use handle::{CollectError, RunHandle, StartError};
pub use observer::{DispatchObserver, ObserverRegistry};
pub use outcome::{DebugBundle, DebugPaths, Outcome, OutputDocument};
pub use queue::{CrawlJob, JobQueue, QueueError};
pub use recorder::{OutcomeRecorder, RecordError};
pub use request_loop::{
    CatalogJobHandler, CrawlRequestLoop, JobHandler, LoopError, RequestLoopConfig,
};
pub use runtime::{DockerRuntime, ExecOutput, RuntimeError, SandboxRuntime};
pub use stats::{BatchStats, StatsTracker};
pub use status::CrawlStatus;
pub use unit::WorkUnit;
