use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::flow::{Context, Graph, GraphBuilder, Result, Task};
use crate::models::DocumentRun;
use crate::tasks::*;

/// Per-document pipeline: recognize, normalize, extract, annotate, synthesize,
/// then persist when synthesis produced any table.
pub fn build_records_workflow(
    recognizer: Arc<dyn TextRecognizer>,
    extractor: StructuredExtractor,
) -> Graph {
    let recognize_task = Arc::new(RecognizeTask::new(recognizer));
    let recognize_id = recognize_task.id().to_string();

    let normalize_task = Arc::new(NormalizeTask);
    let normalize_id = normalize_task.id().to_string();

    let extract_task = Arc::new(ExtractTask::new(extractor));
    let extract_id = extract_task.id().to_string();

    let annotate_task = Arc::new(AnnotateTask);
    let annotate_id = annotate_task.id().to_string();

    let synthesize_task = Arc::new(SynthesizeTask);
    let synthesize_id = synthesize_task.id().to_string();

    let persist_task = Arc::new(PersistTask);
    let persist_id = persist_task.id().to_string();

    GraphBuilder::new("records_workflow")
        .add_task(recognize_task)
        .add_task(normalize_task)
        .add_task(extract_task)
        .add_task(annotate_task)
        .add_task(synthesize_task)
        .add_task(persist_task)
        .add_edge(&recognize_id, &normalize_id)
        .add_edge(&normalize_id, &extract_id)
        .add_edge(&extract_id, &annotate_id)
        .add_edge(&annotate_id, &synthesize_id)
        .add_conditional_edge(&synthesize_id, &persist_id, |ctx| {
            ctx.get_sync::<bool>(session_keys::HAS_RECORDS)
                .unwrap_or(false)
        })
        .build()
}

pub fn new_document_run(patient_id: &str, source_path: &Path, tables_dir: &Path) -> DocumentRun {
    let source_file = source_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_path.display().to_string());

    DocumentRun {
        run_id: Uuid::new_v4().to_string(),
        patient_id: patient_id.to_string(),
        source_path: source_path.to_path_buf(),
        source_file,
        tables_dir: tables_dir.to_path_buf(),
        raw_text: None,
        cleansed_text: None,
        extraction: None,
        context: None,
        records: None,
        tables_written: Vec::new(),
    }
}

pub async fn create_document_context(
    patient_id: &str,
    source_path: &Path,
    tables_dir: &Path,
) -> Result<Context> {
    let document = new_document_run(patient_id, source_path, tables_dir);
    let context = Context::new();
    context.set(session_keys::DOCUMENT, document).await?;
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoService;

    #[async_trait]
    impl StructuredExtractionService for NoService {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("offline")
        }
    }

    struct StaticText(&'static str);

    #[async_trait]
    impl TextRecognizer for StaticText {
        async fn recognize(&self, _path: &Path) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn workflow(text: &'static str) -> Graph {
        build_records_workflow(
            Arc::new(StaticText(text)),
            StructuredExtractor::new(Arc::new(NoService)),
        )
    }

    #[test]
    fn test_new_document_run_uses_file_name_as_source() {
        let run = new_document_run("p1", Path::new("/scans/2024/visit.pdf"), Path::new("/out"));
        assert_eq!(run.source_file, "visit.pdf");
        assert_eq!(run.patient_id, "p1");
        assert!(Uuid::parse_str(&run.run_id).is_ok());
        assert!(run.raw_text.is_none());
    }

    #[tokio::test]
    async fn test_workflow_persists_when_records_exist() {
        let dir = tempfile::tempdir().unwrap();
        let context = create_document_context("p1", Path::new("/scans/a.png"), dir.path())
            .await
            .unwrap();

        let result = workflow("BP 130/85 recorded")
            .execute(context.clone())
            .await
            .unwrap();

        assert_eq!(result.executed_tasks.len(), 6);
        assert_eq!(result.response.as_deref(), Some("vitals_history.csv"));
        assert_eq!(result.status_message.as_deref(), Some("Records persisted"));
        let document: DocumentRun = context.get(session_keys::DOCUMENT).await.unwrap();
        assert!(document.extraction.unwrap().is_degraded());
        assert_eq!(document.tables_written, vec!["vitals_history.csv"]);
    }

    #[tokio::test]
    async fn test_workflow_skips_persist_without_records() {
        let dir = tempfile::tempdir().unwrap();
        let context = create_document_context("p1", Path::new("/scans/a.png"), dir.path())
            .await
            .unwrap();

        let result = workflow("nothing structured here")
            .execute(context.clone())
            .await
            .unwrap();

        assert_eq!(result.executed_tasks.len(), 5);
        assert!(result.response.is_none());
        assert_eq!(result.status_message.as_deref(), Some("Records synthesized"));
        let document: DocumentRun = context.get(session_keys::DOCUMENT).await.unwrap();
        assert!(document.records.unwrap().is_empty());
        assert!(document.tables_written.is_empty());
    }
}
