use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::flow::{Graph, GraphError};
use crate::models::{AvailableFile, BatchReport, BatchRequest, DocumentRun, FailedFile, ProcessedFile};
use crate::schema::TABLES_DIR;
use crate::store::StoreError;
use crate::tasks::{StructuredExtractor, TextRecognizer, session_keys};
use crate::workflow::{build_records_workflow, create_document_context};

pub const MAX_PATIENT_ID_CHARS: usize = 50;

/// Extensions accepted as scanned documents
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tiff", "tif", "bmp", "webp", "pdf"];

/// Called with `(percent, message)` at file boundaries
pub type ProgressCallback = Arc<dyn Fn(f64, &str) + Send + Sync>;

/// Returns the trimmed identifier when it is usable as a patient id.
pub fn validate_patient_id(patient_id: &str) -> Result<String, PipelineError> {
    let trimmed = patient_id.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::Validation("Patient ID is required".to_string()));
    }
    if trimmed.chars().count() > MAX_PATIENT_ID_CHARS {
        return Err(PipelineError::Validation(format!(
            "Patient ID must be at most {MAX_PATIENT_ID_CHARS} characters"
        )));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(PipelineError::Validation(
            "Patient ID may only contain letters, numbers, hyphens and underscores".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// A request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedBatch {
    pub patient_id: String,
    pub output_folder: PathBuf,
    pub files: Vec<PathBuf>,
}

impl ValidatedBatch {
    pub fn tables_dir(&self) -> PathBuf {
        self.output_folder.join(TABLES_DIR)
    }
}

/// Check every precondition of a batch, reporting all problems at once.
pub fn validate_request(request: &BatchRequest) -> Result<ValidatedBatch, PipelineError> {
    let mut problems = Vec::new();

    let patient_id = match validate_patient_id(&request.patient_id) {
        Ok(id) => Some(id),
        Err(PipelineError::Validation(message)) => {
            problems.push(message);
            None
        }
        Err(e) => {
            problems.push(e.to_string());
            None
        }
    };

    let output_folder = request.output_folder.trim();
    if output_folder.is_empty() {
        problems.push("Output folder is required".to_string());
    } else if !Path::new(output_folder).exists() {
        problems.push(format!("Output folder does not exist: {output_folder}"));
    } else if !Path::new(output_folder).is_dir() {
        problems.push(format!("Output path is not a directory: {output_folder}"));
    }

    let mut files = Vec::new();
    if request.selected_files.is_empty() {
        problems.push("No files selected".to_string());
    } else {
        for file in &request.selected_files {
            let path = PathBuf::from(file);
            if path.is_file() {
                files.push(path);
            } else {
                warn!("Selected file not found, skipping: {}", file);
            }
        }
        if files.is_empty() {
            problems.push("None of the selected files exist".to_string());
        }
    }

    match patient_id {
        Some(patient_id) if problems.is_empty() => Ok(ValidatedBatch {
            patient_id,
            output_folder: PathBuf::from(output_folder),
            files,
        }),
        _ => Err(PipelineError::Validation(problems.join("; "))),
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Supported documents directly inside `folder`, sorted by path.
pub fn list_supported_files(folder: &Path) -> std::io::Result<Vec<AvailableFile>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || !is_supported(&path) {
            continue;
        }

        let metadata = entry.metadata()?;
        let size_mb = (metadata.len() as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;
        let modified = metadata
            .modified()
            .map(|time| {
                chrono::DateTime::<chrono::Local>::from(time)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            })
            .unwrap_or_default();

        files.push(AvailableFile {
            path: path.display().to_string(),
            name: entry.file_name().to_string_lossy().into_owned(),
            size_mb,
            modified,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Runs the per-document workflow over a batch of files, one at a time.
pub struct BatchProcessor {
    workflow: Graph,
    progress: Option<ProgressCallback>,
    stop: Option<Arc<AtomicBool>>,
}

impl BatchProcessor {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, extractor: StructuredExtractor) -> Self {
        Self {
            workflow: build_records_workflow(recognizer, extractor),
            progress: None,
            stop: None,
        }
    }

    pub fn with_progress(mut self, callback: impl Fn(f64, &str) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Once the flag is set, documents not yet started are skipped.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn report_progress(&self, percent: f64, message: &str) {
        if let Some(progress) = &self.progress {
            progress(percent, message);
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|stop| stop.load(Ordering::SeqCst))
    }

    /// Validate the request, then process every file.
    ///
    /// Only validation and output-directory failures are returned as errors;
    /// per-document failures are recorded in the report.
    pub async fn process(&self, request: &BatchRequest) -> Result<BatchReport, PipelineError> {
        let batch = validate_request(request)?;
        let tables_dir = batch.tables_dir();
        std::fs::create_dir_all(&tables_dir).map_err(|e| PipelineError::Persistence {
            table: TABLES_DIR.to_string(),
            source: StoreError::Io(e),
        })?;

        let total = batch.files.len();
        let mut report = BatchReport {
            batch_id: Uuid::new_v4().to_string(),
            total_files: total,
            ..Default::default()
        };
        info!(
            batch_id = %report.batch_id,
            patient_id = %batch.patient_id,
            files = total,
            "Starting batch"
        );

        for (index, path) in batch.files.iter().enumerate() {
            if self.stop_requested() {
                report.skipped_files = total - index;
                warn!(batch_id = %report.batch_id, skipped = report.skipped_files, "Batch stopped");
                break;
            }

            let filename = file_name(path);
            self.report_progress(
                index as f64 / total as f64 * 100.0,
                &format!("Processing {filename}"),
            );

            match self
                .process_document(&batch.patient_id, path, &tables_dir)
                .await
            {
                Ok(document) => {
                    let records_created = document
                        .records
                        .as_ref()
                        .map(|records| records.total_records())
                        .unwrap_or(0);
                    let degraded_extraction = document
                        .extraction
                        .as_ref()
                        .is_some_and(|extraction| extraction.is_degraded());

                    info!(
                        run_id = %document.run_id,
                        records = records_created,
                        "Processed {}",
                        filename
                    );

                    for table in &document.tables_written {
                        if !report.csv_files_created.contains(table) {
                            report.csv_files_created.push(table.clone());
                        }
                    }
                    report.processed_files += 1;
                    report.total_records += records_created;
                    report.files_processed.push(ProcessedFile {
                        filename,
                        records_created,
                        degraded_extraction,
                        tables_written: document.tables_written,
                    });
                }
                Err(e) => {
                    error!("Failed to process {}: {}", filename, e);
                    report.failed_files += 1;
                    report.files_failed.push(FailedFile {
                        filename,
                        error: e.to_string(),
                    });
                }
            }
        }

        self.report_progress(100.0, "Processing complete");
        report.success = true;
        info!(
            batch_id = %report.batch_id,
            processed = report.processed_files,
            failed = report.failed_files,
            records = report.total_records,
            "Batch complete"
        );

        Ok(report)
    }

    async fn process_document(
        &self,
        patient_id: &str,
        path: &Path,
        tables_dir: &Path,
    ) -> Result<DocumentRun, GraphError> {
        let context = create_document_context(patient_id, path, tables_dir).await?;
        let result = self.workflow.execute(context.clone()).await?;
        debug!(
            file = %path.display(),
            tasks = result.executed_tasks.len(),
            status = ?result.status_message,
            tables = ?result.response,
            "Document workflow finished"
        );
        context
            .get(session_keys::DOCUMENT)
            .await
            .ok_or_else(|| GraphError::ContextError("Document not found in context".to_string()))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
