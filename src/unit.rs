//! Work unit identity and invocation data.

/// One independently-invocable spider exposed by a deployed image.
///
/// A work unit pairs a globally-unique identifier (within its catalog) with
/// everything needed to start one execution attempt: the image to run and the
/// spider's entry file inside it. Work units are immutable once discovered;
/// the dispatcher only reads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Identifier unique within the catalog that produced this unit.
    pub id: String,
    /// Isolated-environment image the unit runs in.
    pub image: String,
    /// Entry file passed as the sole argument when the image is started.
    pub absolute_filename: String,
}

impl WorkUnit {
    /// Create a new work unit.
    pub fn new(
        id: impl Into<String>,
        image: impl Into<String>,
        absolute_filename: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            absolute_filename: absolute_filename.into(),
        }
    }
}
