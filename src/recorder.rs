//! Durable persistence of outcomes.
//!
//! The recorder is the only component in the crate that performs durable
//! writes. Each recorded work unit gets a fresh directory under the output
//! root:
//!
//! ```text
//! <output_root>/<work-unit-id>/
//!   crawl-output.json
//!   screenshot.png          (when captured)
//!   crawl-log.txt           (when captured)
//!   chrome-driver-log.txt   (when captured)
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::outcome::{DebugPaths, Outcome, OutputDocument, OutputMetadata, StatusField};

/// Filename of the serialized structured result.
pub const OUTPUT_FILE: &str = "crawl-output.json";
/// Filename of the extracted screenshot artifact.
pub const SCREENSHOT_FILE: &str = "screenshot.png";
/// Filename of the extracted crawl log artifact.
pub const CRAWL_LOG_FILE: &str = "crawl-log.txt";
/// Filename of the extracted browser-driver log artifact.
pub const CHROME_DRIVER_LOG_FILE: &str = "chrome-driver-log.txt";

/// Errors persisting an outcome.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The per-unit directory already exists: this outcome was recorded
    /// before. Guards against double-recording; the first recording is left
    /// untouched.
    #[error("outcome for work unit '{0}' was already recorded")]
    AlreadyExists(String),

    #[error("failed to write outcome: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize outcome: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Writes one [`Outcome`] per work unit under an output root.
#[derive(Debug, Clone)]
pub struct OutcomeRecorder {
    output_root: PathBuf,
}

impl OutcomeRecorder {
    /// Recorder rooted at `output_root`. The root is created lazily on the
    /// first recording.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    /// The root all per-unit directories are created under.
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Persist `outcome` under a fresh `<output_root>/<unit_id>/` directory
    /// and return that directory's path.
    ///
    /// Debug artifacts are written first under their predictable filenames;
    /// the structured result follows as `crawl-output.json` with its `_debug`
    /// references rewritten to those local names.
    pub async fn record(&self, unit_id: &str, outcome: &Outcome) -> Result<PathBuf, RecordError> {
        tokio::fs::create_dir_all(&self.output_root).await?;

        let dir = self.output_root.join(unit_id);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(RecordError::AlreadyExists(unit_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        let debug_paths = self.write_artifacts(&dir, outcome).await?;

        let document = OutputDocument {
            metadata: OutputMetadata {
                status: StatusField {
                    code: outcome.status.code(),
                    message: outcome.message.clone(),
                },
                extra: outcome.metadata_extra.clone(),
            },
            debug: debug_paths,
            payload: outcome.payload.clone(),
        };
        let serialized = serde_json::to_vec_pretty(&document)?;
        tokio::fs::write(dir.join(OUTPUT_FILE), serialized).await?;

        info!(
            unit = unit_id,
            status = %outcome.status,
            duration_ms = outcome.duration.as_millis() as u64,
            dir = %dir.display(),
            "outcome recorded"
        );
        Ok(dir)
    }

    /// Write whichever debug artifacts were captured and return the local
    /// `_debug` references for the serialized document.
    async fn write_artifacts(
        &self,
        dir: &Path,
        outcome: &Outcome,
    ) -> Result<Option<DebugPaths>, RecordError> {
        if outcome.debug.is_empty() {
            return Ok(None);
        }

        let mut paths = DebugPaths::default();
        if let Some(bytes) = &outcome.debug.screenshot {
            tokio::fs::write(dir.join(SCREENSHOT_FILE), bytes).await?;
            paths.screenshot = Some(SCREENSHOT_FILE.to_string());
        }
        if let Some(bytes) = &outcome.debug.crawl_log {
            tokio::fs::write(dir.join(CRAWL_LOG_FILE), bytes).await?;
            paths.crawl_log = Some(CRAWL_LOG_FILE.to_string());
        }
        if let Some(bytes) = &outcome.debug.chrome_driver_log {
            tokio::fs::write(dir.join(CHROME_DRIVER_LOG_FILE), bytes).await?;
            paths.chrome_driver_log = Some(CHROME_DRIVER_LOG_FILE.to_string());
        }
        debug!(dir = %dir.display(), "debug artifacts written");
        Ok(Some(paths))
    }
}
