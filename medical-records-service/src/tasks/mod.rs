pub mod annotate;
pub mod extract;
pub mod normalize;
pub mod persist;
pub mod recognize;
pub mod synthesize;
pub mod utils;

pub use annotate::AnnotateTask;
pub use extract::{ExtractTask, LlmExtractionService, StructuredExtractionService, StructuredExtractor};
pub use normalize::NormalizeTask;
pub use persist::PersistTask;
pub use recognize::{RecognizeTask, TextRecognizer, VisionRecognizer};
pub use synthesize::SynthesizeTask;

/// Keys shared by the tasks through the workflow context
pub mod session_keys {
    /// The [`DocumentRun`](crate::models::DocumentRun) being processed
    pub const DOCUMENT: &str = "document";
    /// Set by synthesis when at least one table has rows or a key
    pub const HAS_RECORDS: &str = "has_records";
}
