use thiserror::Error;

use crate::store::StoreError;

/// Failures surfaced by the records pipeline.
///
/// Extraction service failures are not listed here: they are recovered inside
/// the extract stage by the deterministic fallback and never reach callers.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Rejected batch input, reported before any document is processed
    #[error("Processing requirements not met: {0}")]
    Validation(String),

    /// Recognition produced no usable text for a document
    #[error("No text extracted")]
    NoTextExtracted,

    #[error("Failed to persist table {table}: {source}")]
    Persistence {
        table: String,
        #[source]
        source: StoreError,
    },
}
