//! Work-unit discovery from a deployed image.
//!
//! A deployed artifact advertises the spiders it contains through a fixed
//! introspection command: run with [`INTROSPECTION_ARG`], the image prints a
//! single JSON document of the shape
//!
//! ```json
//! {
//!   "<category>": { "<identifier>": { "absoluteFilename": "<path>" } },
//!   "_metadata": { "version": "..." }
//! }
//! ```
//!
//! and exits zero. Discovery strips the reserved `_metadata` key and flattens
//! the categories into one identifier-to-work-unit mapping.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::outcome::METADATA_KEY;
use crate::runtime::{RuntimeError, SandboxRuntime};
use crate::unit::WorkUnit;

/// Fixed argument that asks a deployed image to enumerate its spiders.
pub const INTROSPECTION_ARG: &str = "--list-spiders";

/// Errors enumerating the work units of a deployed image.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The environment runtime could not be reached.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// The introspection command ran but exited non-zero.
    #[error("introspection command exited with {exit_code}: {stderr}")]
    IntrospectionFailed { exit_code: i32, stderr: String },

    /// The introspection command emitted malformed structured output.
    #[error("malformed discovery document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The same identifier appeared in more than one category.
    #[error("duplicate work unit identifier '{0}' in discovery document")]
    DuplicateIdentifier(String),
}

#[derive(Debug, Deserialize)]
struct SpiderEntry {
    #[serde(rename = "absoluteFilename")]
    absolute_filename: String,
}

/// The set of work units discoverable within one deployed image.
#[derive(Debug, Clone)]
pub struct WorkUnitCatalog {
    units: BTreeMap<String, WorkUnit>,
}

impl WorkUnitCatalog {
    /// Enumerate the spiders `image` exposes.
    ///
    /// Runs the introspection command inside one throwaway instance of the
    /// image and parses its output. No side effects beyond spawning and
    /// discarding that instance.
    pub async fn discover(
        runtime: &dyn SandboxRuntime,
        image: &str,
    ) -> Result<Self, DiscoveryError> {
        debug!(image, "running catalog introspection");
        let exec = runtime
            .run_to_completion(image, &[INTROSPECTION_ARG.to_string()])
            .await?;
        if !exec.success() {
            return Err(DiscoveryError::IntrospectionFailed {
                exit_code: exec.exit_code,
                stderr: exec.stderr,
            });
        }

        let mut document: Map<String, Value> = serde_json::from_str(exec.stdout.trim())?;
        document.remove(METADATA_KEY);

        let mut units = BTreeMap::new();
        for (category, value) in document {
            let entries: BTreeMap<String, SpiderEntry> = serde_json::from_value(value)?;
            for (id, entry) in entries {
                debug!(category = %category, unit = %id, "discovered work unit");
                let unit = WorkUnit::new(&id, image, entry.absolute_filename);
                if units.insert(id.clone(), unit).is_some() {
                    return Err(DiscoveryError::DuplicateIdentifier(id));
                }
            }
        }

        info!(image, units = units.len(), "catalog discovered");
        Ok(Self { units })
    }

    /// Look one work unit up by identifier.
    pub fn get(&self, id: &str) -> Option<&WorkUnit> {
        self.units.get(id)
    }

    /// Number of discovered work units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// True when the image exposes no spiders at all.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Identifiers in stable (sorted) order.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    /// Consume the catalog into work units in stable (sorted) order. This is
    /// the FIFO submission order the dispatcher runs a whole catalog in.
    pub fn into_units(self) -> Vec<WorkUnit> {
        self.units.into_values().collect()
    }
}
