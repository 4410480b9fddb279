//! Structured results of work-unit executions.
//!
//! A work unit is expected to print exactly one JSON document to standard
//! output when it finishes, shaped as:
//!
//! ```json
//! {
//!   "_metadata": { "status": { "code": 0, "message": null } },
//!   "_debug": {
//!     "screenshot": "/tmp/screenshot.png",
//!     "crawlLog": "/tmp/crawl.log",
//!     "chromeDriverLog": "/tmp/chromedriver.log"
//!   },
//!   "...": "domain data"
//! }
//! ```
//!
//! [`OutputDocument`] models that wire shape. An [`Outcome`] is the in-memory
//! result after the referenced debug artifacts have been pulled out of the
//! isolated environment: artifact contents are inlined, and the recorder
//! later rewrites the `_debug` values to local filenames when it persists the
//! document.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::CrawlStatus;

/// Reserved key carrying status information in discovery and output documents.
pub const METADATA_KEY: &str = "_metadata";

/// Wire form of one work unit's standard-output document, and of the
/// persisted `crawl-output.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDocument {
    #[serde(rename = "_metadata")]
    pub metadata: OutputMetadata,
    #[serde(rename = "_debug", default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugPaths>,
    /// Domain-specific extracted data, passed through untouched.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// The `_metadata` envelope of an output document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub status: StatusField,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Status entry inside `_metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusField {
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Debug artifact references inside an output document. In a unit's own
/// output these are paths inside the isolated environment; in a persisted
/// `crawl-output.json` they are rewritten to local filenames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugPaths {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawl_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_driver_log: Option<String>,
}

/// Debug artifacts extracted from an isolated environment, inlined as bytes.
///
/// Extraction is best effort: any artifact the environment no longer has (or
/// never produced) is simply absent.
#[derive(Debug, Clone, Default)]
pub struct DebugBundle {
    pub screenshot: Option<Vec<u8>>,
    pub crawl_log: Option<Vec<u8>>,
    pub chrome_driver_log: Option<Vec<u8>>,
}

impl DebugBundle {
    /// True when no artifact was captured.
    pub fn is_empty(&self) -> bool {
        self.screenshot.is_none() && self.crawl_log.is_none() && self.chrome_driver_log.is_none()
    }
}

/// The structured result of one work-unit execution attempt.
///
/// Created once a [`RunHandle`](crate::handle::RunHandle) reaches a terminal
/// state; never mutated after recording.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: CrawlStatus,
    pub message: Option<String>,
    /// Domain data from the unit's output document.
    pub payload: Map<String, Value>,
    /// Non-status `_metadata` entries from the unit's output document.
    pub metadata_extra: Map<String, Value>,
    pub debug: DebugBundle,
    /// Wall-clock duration of the execution.
    pub duration: Duration,
}

impl Outcome {
    /// Build an outcome from a parsed output document plus its extracted
    /// debug artifacts.
    pub fn from_document(document: OutputDocument, debug: DebugBundle, duration: Duration) -> Self {
        Self {
            status: CrawlStatus::from_code(document.metadata.status.code),
            message: document.metadata.status.message,
            payload: document.payload,
            metadata_extra: document.metadata.extra,
            debug,
            duration,
        }
    }

    /// Outcome for a unit that produced no parseable output document: its
    /// process died (or printed garbage) before reporting a result.
    pub fn crashed(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: CrawlStatus::CrawlException,
            message: Some(message.into()),
            payload: Map::new(),
            metadata_extra: Map::new(),
            debug: DebugBundle::default(),
            duration,
        }
    }

    /// Outcome synthesized by the dispatcher for a unit killed over its time
    /// budget.
    pub fn ran_too_long(duration: Duration) -> Self {
        Self {
            status: CrawlStatus::RanTooLong,
            message: Some(CrawlStatus::RanTooLong.to_string()),
            payload: Map::new(),
            metadata_extra: Map::new(),
            debug: DebugBundle::default(),
            duration,
        }
    }

    /// Outcome for a crawl-request job naming an identifier absent from the
    /// catalog.
    pub fn spider_not_found(identifier: &str) -> Self {
        Self {
            status: CrawlStatus::SpiderNotFound,
            message: Some(format!("no spider named '{identifier}' in catalog")),
            payload: Map::new(),
            metadata_extra: Map::new(),
            debug: DebugBundle::default(),
            duration: Duration::ZERO,
        }
    }

    /// Attach extracted debug artifacts, keeping everything else.
    pub fn with_debug(mut self, debug: DebugBundle) -> Self {
        self.debug = debug;
        self
    }

    /// Attach a human-readable message, keeping everything else.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
