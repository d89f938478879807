use anyhow::anyhow;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageFormat};
use pdf2image::{PDF, Pages};
use reqwest::Client;
use serde_json::{Value, json};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::session_keys;
use super::utils::call_openrouter_api;
use crate::error::PipelineError;
use crate::flow::{Context, GraphError, NextAction, Result, Task, TaskResult};
use crate::models::DocumentRun;

/// Capability that recovers free-form text from a scanned document.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, path: &Path) -> anyhow::Result<String>;
}

pub const TRANSCRIPTION_INSTRUCTION: &str = "Extract ALL readable text from this medical document image with high accuracy.
Preserve the structure and formatting as much as possible.
Pay special attention to:
- Patient names, dates of birth, contact information
- Medical record numbers, appointment dates
- Vital signs (blood pressure, heart rate, temperature, weight, height)
- Medications, dosages, and instructions
- Diagnoses, ICD codes, and medical conditions
- Lab results, test values, and reference ranges
- Allergies and reactions
- Symptoms and their descriptions
- Family history information
- Social history (smoking, alcohol, occupation)

Format the output as clear, readable text maintaining the original document structure.";

/// MIME type declared to the vision service, guessed from the extension.
pub fn declared_mime_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| "image/png".to_string())
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Transcription through an OpenRouter vision model. PDFs are rendered to one
/// PNG per page and sent together in a single request.
pub struct VisionRecognizer {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl VisionRecognizer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
        }
    }
}

#[async_trait]
impl TextRecognizer for VisionRecognizer {
    async fn recognize(&self, path: &Path) -> anyhow::Result<String> {
        let pages = load_page_images(path).await?;
        if pages.is_empty() {
            return Err(anyhow!("No page images produced for {}", path.display()));
        }

        let mut content = vec![json!({
            "type": "text",
            "text": TRANSCRIPTION_INSTRUCTION
        })];
        content.extend(pages.into_iter().map(|(mime_type, data)| image_content(&mime_type, &data)));

        let text = call_openrouter_api(
            &self.client,
            &self.api_key,
            &self.model,
            content,
            self.max_tokens,
        )
        .await?;

        info!(
            "Vision OCR completed for {}: {} characters",
            path.display(),
            text.len()
        );
        Ok(text.trim().to_string())
    }
}

fn image_content(mime_type: &str, base64_data: &str) -> Value {
    json!({
        "type": "image_url",
        "image_url": {
            "url": format!("data:{};base64,{}", mime_type, base64_data)
        }
    })
}

/// Base64 page images with their MIME type
async fn load_page_images(path: &Path) -> anyhow::Result<Vec<(String, String)>> {
    if !tokio::fs::try_exists(path).await? {
        return Err(anyhow!("File not found: {}", path.display()));
    }

    if is_pdf(path) {
        let images = convert_pdf_to_images(path.to_path_buf()).await?;
        return images
            .iter()
            .map(|image| -> anyhow::Result<(String, String)> {
                Ok(("image/png".to_string(), image_to_base64(image)?))
            })
            .collect();
    }

    let bytes = tokio::fs::read(path).await?;
    Ok(vec![(declared_mime_type(path), STANDARD.encode(&bytes))])
}

/// Convert PDF to images using pdf2image
async fn convert_pdf_to_images(pdf_path: PathBuf) -> anyhow::Result<Vec<DynamicImage>> {
    let images = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<DynamicImage>> {
        let pdf = PDF::from_file(&pdf_path).map_err(|e| anyhow!("Failed to load PDF: {}", e))?;

        let rendered_images = pdf
            .render(Pages::All, None)
            .map_err(|e| anyhow!("Failed to render PDF pages: {}", e))?;

        info!("Rendered {} pages from PDF", rendered_images.len());
        Ok(rendered_images)
    })
    .await??;

    Ok(images)
}

fn image_to_base64(image: &DynamicImage) -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    let mut cursor = Cursor::new(&mut buffer);

    image
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|e| anyhow!("Failed to encode image: {}", e))?;

    Ok(STANDARD.encode(&buffer))
}

pub struct RecognizeTask {
    recognizer: Arc<dyn TextRecognizer>,
}

impl RecognizeTask {
    pub fn new(recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self { recognizer }
    }
}

#[async_trait]
impl Task for RecognizeTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let mut document: DocumentRun = context
            .get(session_keys::DOCUMENT)
            .await
            .ok_or_else(|| GraphError::ContextError("Document not found in context".to_string()))?;

        info!(run_id = %document.run_id, "Recognizing text in {}", document.source_file);

        let text = match self.recognizer.recognize(&document.source_path).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!(run_id = %document.run_id, "Recognition returned no text for {}", document.source_file);
                return Err(PipelineError::NoTextExtracted.into());
            }
            Err(e) => {
                error!(run_id = %document.run_id, "Error processing {}: {}", document.source_file, e);
                return Err(PipelineError::NoTextExtracted.into());
            }
        };

        info!(
            run_id = %document.run_id,
            "Recognized {} characters",
            text.len()
        );
        document.raw_text = Some(text);
        context.set(session_keys::DOCUMENT, document).await?;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::Continue,
            Some("Text recognized".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::new_document_run;

    struct FixedRecognizer(anyhow::Result<String>);

    #[async_trait]
    impl TextRecognizer for FixedRecognizer {
        async fn recognize(&self, _path: &Path) -> anyhow::Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(anyhow!("{e}")),
            }
        }
    }

    async fn run_with(recognizer: FixedRecognizer) -> (Context, Result<TaskResult>) {
        let context = Context::new();
        let document = new_document_run(
            "patient-001",
            Path::new("/scans/visit.jpg"),
            Path::new("/out/csv_database_ready"),
        );
        context.set(session_keys::DOCUMENT, document).await.unwrap();
        let result = RecognizeTask::new(Arc::new(recognizer))
            .run(context.clone())
            .await;
        (context, result)
    }

    #[test]
    fn test_declared_mime_type() {
        assert_eq!(declared_mime_type(Path::new("a/scan.JPG")), "image/jpeg");
        assert_eq!(declared_mime_type(Path::new("scan.png")), "image/png");
        assert_eq!(declared_mime_type(Path::new("scan.tiff")), "image/tiff");
        assert_eq!(declared_mime_type(Path::new("scan")), "image/png");
        assert!(is_pdf(Path::new("report.PDF")));
        assert!(!is_pdf(Path::new("report.png")));
    }

    #[tokio::test]
    async fn test_recognized_text_is_stored() {
        let (context, result) = run_with(FixedRecognizer(Ok("BP 120/80".to_string()))).await;
        assert!(result.is_ok());

        let document: DocumentRun = context.get(session_keys::DOCUMENT).await.unwrap();
        assert_eq!(document.raw_text.as_deref(), Some("BP 120/80"));
    }

    #[tokio::test]
    async fn test_blank_or_failed_recognition_is_no_text_extracted() {
        for recognizer in [
            FixedRecognizer(Ok("   \n".to_string())),
            FixedRecognizer(Err(anyhow!("quota exceeded"))),
        ] {
            let (_, result) = run_with(recognizer).await;
            let err = result.unwrap_err();
            assert!(matches!(err, GraphError::Pipeline(PipelineError::NoTextExtracted)));
            assert_eq!(err.to_string(), "No text extracted");
        }
    }

    /// Live OCR check against OpenRouter.
    /// Usage: OPENROUTER_API_KEY=key OCR_TEST_PATH=/path/scan.png cargo test test_live_vision_ocr
    #[tokio::test]
    async fn test_live_vision_ocr() -> anyhow::Result<()> {
        let (Ok(api_key), Ok(path)) = (
            std::env::var("OPENROUTER_API_KEY"),
            std::env::var("OCR_TEST_PATH"),
        ) else {
            println!("Skipping test - set OPENROUTER_API_KEY and OCR_TEST_PATH");
            return Ok(());
        };

        let recognizer = VisionRecognizer::new(api_key, "openai/gpt-4.1-mini", 4000);
        let text = recognizer.recognize(Path::new(&path)).await?;
        println!("Extracted {} characters", text.len());
        assert!(!text.trim().is_empty());
        Ok(())
    }
}
