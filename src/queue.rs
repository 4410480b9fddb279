//! External crawl-request queue contract.
//!
//! The queue service itself is an external collaborator; this module only
//! fixes the contract the [`CrawlRequestLoop`](crate::request_loop::CrawlRequestLoop)
//! consumes. Delivery is at-least-once: a crash between read and delete may
//! cause a job to be reprocessed, which callers accept.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One crawl request pulled from the queue.
///
/// A plain record with compile-time-known fields; any schema validation of
/// incoming messages happens at the queue boundary, before a job reaches
/// the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    /// Queue receipt handle, required to delete the job after processing.
    pub receipt: String,
    /// Identifier of the spider to run.
    pub spider: String,
    /// Spider parameters, passed through untouched.
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Errors from the queue backend.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(String),
}

/// Read/delete operations against a hosted queue service.
#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    /// Fetch at most one job. `None` when the queue is currently empty.
    async fn read_one(&self) -> Result<Option<CrawlJob>, QueueError>;

    /// Delete a processed job so it is not delivered again.
    async fn delete(&self, job: &CrawlJob) -> Result<(), QueueError>;
}
