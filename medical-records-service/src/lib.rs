pub mod batch;
pub mod config;
pub mod error;
pub mod flow;
pub mod models;
pub mod schema;
pub mod service;
pub mod store;
pub mod tasks;
pub mod workflow;

pub use batch::{BatchProcessor, list_supported_files, validate_patient_id};
pub use config::ServiceConfig;
pub use error::PipelineError;
pub use models::{BatchReport, BatchRequest};
pub use service::{AppState, create_app};
pub use store::{StoreError, TableStore};
pub use workflow::{build_records_workflow, create_document_context, new_document_run};
