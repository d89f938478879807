use std::sync::Arc;

use anyhow::{Context as _, anyhow};

use crate::batch::BatchProcessor;
use crate::tasks::{LlmExtractionService, StructuredExtractor, VisionRecognizer};

pub const DEFAULT_OCR_MODEL: &str = "openai/gpt-4.1-mini";
pub const DEFAULT_EXTRACTION_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_OCR_MAX_TOKENS: u32 = 4000;
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub openrouter_api_key: String,
    pub ocr_model: String,
    pub extraction_model: String,
    pub ocr_max_tokens: u32,
    pub port: u16,
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let openrouter_api_key = lookup("OPENROUTER_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("OPENROUTER_API_KEY environment variable is required"))?;

        let ocr_max_tokens = match lookup("OCR_MAX_TOKENS") {
            Some(value) => value
                .parse()
                .with_context(|| format!("Invalid OCR_MAX_TOKENS: {value}"))?,
            None => DEFAULT_OCR_MAX_TOKENS,
        };

        let port = match lookup("PORT") {
            Some(value) => value
                .parse()
                .with_context(|| format!("Invalid PORT: {value}"))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            openrouter_api_key,
            ocr_model: lookup("OCR_MODEL").unwrap_or_else(|| DEFAULT_OCR_MODEL.to_string()),
            extraction_model: lookup("EXTRACTION_MODEL")
                .unwrap_or_else(|| DEFAULT_EXTRACTION_MODEL.to_string()),
            ocr_max_tokens,
            port,
        })
    }

    /// Batch processor backed by the OpenRouter recognition and extraction services.
    pub fn batch_processor(&self) -> BatchProcessor {
        let recognizer = VisionRecognizer::new(
            self.openrouter_api_key.clone(),
            self.ocr_model.clone(),
            self.ocr_max_tokens,
        );
        let extraction = LlmExtractionService::new(
            self.openrouter_api_key.clone(),
            self.extraction_model.clone(),
        );
        BatchProcessor::new(
            Arc::new(recognizer),
            StructuredExtractor::new(Arc::new(extraction)),
        )
    }
}
