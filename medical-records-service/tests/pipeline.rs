use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use medical_records_service::tasks::{StructuredExtractionService, StructuredExtractor, TextRecognizer};
use medical_records_service::{BatchProcessor, BatchRequest, PipelineError, TableStore};

const SCAN_TEXT: &str = "Patient Jane Doe, DOB 1/1/1980, BP 120/80, phone 555-123-4567";

/// Returns canned text per file name; unknown files yield nothing.
struct ScriptedRecognizer(HashMap<&'static str, &'static str>);

#[async_trait]
impl TextRecognizer for ScriptedRecognizer {
    async fn recognize(&self, path: &Path) -> anyhow::Result<String> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        Ok(self.0.get(name).copied().unwrap_or_default().to_string())
    }
}

struct FailingService;

#[async_trait]
impl StructuredExtractionService for FailingService {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("extraction service unavailable")
    }
}

struct JsonService(&'static str);

#[async_trait]
impl StructuredExtractionService for JsonService {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

fn scans(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, b"scan").unwrap();
            path
        })
        .collect()
}

fn request(output: &Path, files: &[PathBuf]) -> BatchRequest {
    BatchRequest {
        patient_id: "patient-001".to_string(),
        output_folder: output.display().to_string(),
        selected_files: files.iter().map(|f| f.display().to_string()).collect(),
    }
}

fn processor(
    texts: &[(&'static str, &'static str)],
    service: Arc<dyn StructuredExtractionService>,
) -> BatchProcessor {
    BatchProcessor::new(
        Arc::new(ScriptedRecognizer(texts.iter().copied().collect())),
        StructuredExtractor::new(service),
    )
}

#[tokio::test]
async fn test_fallback_extraction_reaches_vitals_table() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let files = scans(input.path(), &["visit.png"]);

    let report = processor(&[("visit.png", SCAN_TEXT)], Arc::new(FailingService))
        .process(&request(output.path(), &files))
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.processed_files, 1);
    assert_eq!(report.failed_files, 0);
    assert!(report.files_processed[0].degraded_extraction);
    assert_eq!(report.total_records, 2);

    let store = TableStore::new(output.path().join("csv_database_ready"));
    let vitals = store.load("vitals_history").unwrap().unwrap();
    assert_eq!(vitals.rows.len(), 1);
    let row = &vitals.rows[0];
    assert_eq!(row.get("blood_pressure_systolic"), Some("120"));
    assert_eq!(row.get("blood_pressure_diastolic"), Some("80"));
    assert_eq!(row.get("patient_id"), Some("patient-001"));
    assert_eq!(row.get("source_file"), Some("visit.png"));

    let patients = store.load("patients_registration").unwrap().unwrap();
    assert_eq!(patients.rows[0].get("phone"), Some("555-123-4567"));
    assert_eq!(patients.rows[0].get("first_name"), Some(""));
}

#[tokio::test]
async fn test_failed_document_does_not_stop_the_batch() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let files = scans(input.path(), &["blank.png", "visit.png"]);

    let report = processor(&[("visit.png", SCAN_TEXT)], Arc::new(FailingService))
        .process(&request(output.path(), &files))
        .await
        .unwrap();

    assert_eq!(report.total_files, 2);
    assert_eq!(report.processed_files, 1);
    assert_eq!(report.failed_files, 1);
    assert_eq!(report.files_failed[0].filename, "blank.png");
    assert_eq!(report.files_failed[0].error, "No text extracted");
    assert!(report.csv_files_created.contains(&"vitals_history.csv".to_string()));
}

#[tokio::test]
async fn test_reprocessing_appends_rows_and_widens_columns() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let files = scans(input.path(), &["visit.png"]);
    let texts = [("visit.png", "Medications reviewed at visit.")];

    let first = JsonService(r#"{"medications": [{"name": "Metformin", "dosage": "500mg"}]}"#);
    processor(&texts, Arc::new(first))
        .process(&request(output.path(), &files))
        .await
        .unwrap();

    let second = JsonService(
        "```json\n{\"MEDICATIONS\": [{\"name\": \"Lisinopril\"}, {\"dosage\": \"5mg\"}]}\n```",
    );
    let report = processor(&texts, Arc::new(second))
        .process(&request(output.path(), &files))
        .await
        .unwrap();
    assert!(!report.files_processed[0].degraded_extraction);
    assert_eq!(report.total_records, 1);

    let store = TableStore::new(output.path().join("csv_database_ready"));
    let prescriptions = store.load("prescription").unwrap().unwrap();
    let names: Vec<_> = prescriptions
        .rows
        .iter()
        .filter_map(|row| row.get("medication"))
        .collect();
    assert_eq!(names, vec!["Metformin", "Lisinopril"]);
    assert_eq!(prescriptions.rows[1].get("dosage"), Some(""));
    assert!(
        prescriptions.rows[0]
            .get("notes")
            .unwrap()
            .starts_with("[SPECIFIC CONTEXT]: Medications reviewed at visit.")
    );
}

#[tokio::test]
async fn test_validation_fails_before_any_document() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let files = scans(input.path(), &["visit.png"]);

    let mut bad = request(output.path(), &files);
    bad.patient_id = "a b".to_string();

    let err = processor(&[("visit.png", SCAN_TEXT)], Arc::new(FailingService))
        .process(&bad)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Validation(_)));
    assert!(!output.path().join("csv_database_ready").exists());
}

#[tokio::test]
async fn test_progress_and_stop_flag() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let files = scans(input.path(), &["a.png", "b.png", "c.png"]);

    let stop = Arc::new(AtomicBool::new(false));
    let events = Arc::new(Mutex::new(Vec::new()));
    let processor = {
        let stop = stop.clone();
        let events = events.clone();
        processor(
            &[("a.png", SCAN_TEXT), ("b.png", SCAN_TEXT), ("c.png", SCAN_TEXT)],
            Arc::new(FailingService),
        )
        .with_stop_flag(stop.clone())
        .with_progress(move |percent, message| {
            events.lock().unwrap().push((percent, message.to_string()));
            // Ask to stop once the first document has started
            stop.store(true, Ordering::SeqCst);
        })
    };

    let report = processor.process(&request(output.path(), &files)).await.unwrap();

    assert_eq!(report.processed_files, 1);
    assert_eq!(report.skipped_files, 2);
    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            (0.0, "Processing a.png".to_string()),
            (100.0, "Processing complete".to_string()),
        ]
    );
}
