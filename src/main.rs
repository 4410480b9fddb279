//! Batch orchestration entry point.
//!
//! Discovers the spiders a deployed image exposes and runs the whole catalog
//! to completion, one result directory per spider. The process exits 0 when
//! the batch completes, regardless of individual unit outcomes — failures
//! are recorded, not propagated as exit status. Only infrastructure-level
//! failures (unreachable container runtime, malformed discovery document)
//! produce a non-zero exit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crawlmux::{Dispatcher, DockerRuntime, OutcomeRecorder, WorkUnitCatalog};

#[derive(Debug, Parser)]
#[command(name = "crawlmux", version, about = "Run every spider in a deployed image")]
struct Cli {
    /// Directory to write per-spider result directories under.
    output_dir: PathBuf,

    /// Isolated-environment image containing the spiders.
    image: String,

    /// Maximum number of spiders running concurrently.
    #[arg(long = "max-num-spiders-to-run", default_value_t = 1)]
    max_num_spiders_to_run: usize,

    /// Per-spider time budget in seconds before a forcible kill.
    #[arg(long = "max-num-seconds-spiders-run", default_value_t = 60)]
    max_num_seconds_spiders_run: u64,

    /// Log level filter (error, warn, info, debug, trace).
    #[arg(long = "log", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log)
        .with_context(|| format!("invalid log filter '{}'", cli.log))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = Arc::new(DockerRuntime::new());
    let catalog = WorkUnitCatalog::discover(runtime.as_ref(), &cli.image)
        .await
        .with_context(|| format!("failed to discover spiders in '{}'", cli.image))?;
    if catalog.is_empty() {
        warn!(image = %cli.image, "image exposes no spiders, nothing to run");
        return Ok(());
    }

    let dispatcher = Dispatcher::builder(runtime)
        .concurrency_limit(cli.max_num_spiders_to_run)
        .time_limit(Duration::from_secs(cli.max_num_seconds_spiders_run))
        .build()
        .context("invalid dispatcher configuration")?;
    let recorder = OutcomeRecorder::new(&cli.output_dir);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling batch");
            ctrl_c_cancel.cancel();
        }
    });

    let report = dispatcher
        .run_with_cancellation(catalog.into_units(), &recorder, cancel)
        .await
        .context("batch aborted by infrastructure failure")?;

    info!(
        recorded = report.len(),
        succeeded = report.succeeded(),
        failed = report.failed(),
        timed_out = report.timed_out(),
        output_dir = %cli.output_dir.display(),
        "done"
    );
    Ok(())
}
