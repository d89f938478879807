use async_trait::async_trait;
use regex::Regex;
use rig::completion::Prompt;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{info, warn};

use super::session_keys;
use super::utils::get_llm_agent;
use crate::flow::{Context, GraphError, NextAction, Result, Task, TaskResult};
use crate::models::{DocumentRun, Extraction, StructuredDocument};

/// Capability that turns a prompt into (hopefully) JSON text.
#[async_trait]
pub trait StructuredExtractionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Error)]
pub enum ExtractionServiceError {
    #[error("Extraction service call failed: {0}")]
    Service(String),

    #[error("Extraction service returned an empty response")]
    EmptyResponse,

    #[error("Extraction response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Extraction response is not a JSON object")]
    NotAnObject,
}

const EXTRACTION_PREAMBLE: &str =
    "You are a medical records assistant that extracts structured data from clinical documents.";

const EXTRACTION_PROMPT: &str = r#"Please analyze this medical document text and extract structured information.
Return the data in JSON format with exactly the following categories and fields:

{
  "patient_info": {
    "name": "",
    "date_of_birth": "",
    "gender": "",
    "phone": "",
    "email": "",
    "address": "",
    "medical_record_number": ""
  },
  "vitals": {
    "blood_pressure": "",
    "heart_rate": "",
    "temperature": "",
    "weight": "",
    "height": "",
    "date": ""
  },
  "medications": [{
    "name": "",
    "dosage": "",
    "frequency": "",
    "start_date": "",
    "instructions": ""
  }],
  "allergies": [{
    "allergen": "",
    "reaction": "",
    "severity": ""
  }],
  "diagnoses": [{
    "condition": "",
    "icd_code": "",
    "date": "",
    "status": ""
  }],
  "lab_results": [{
    "test_name": "",
    "result": "",
    "unit": "",
    "reference_range": "",
    "date": ""
  }],
  "symptoms": [{
    "symptom": "",
    "severity": "",
    "duration": "",
    "date": ""
  }],
  "family_history": [{
    "relation": "",
    "condition": "",
    "age_of_onset": ""
  }],
  "social_history": {
    "smoking": "",
    "alcohol": "",
    "occupation": "",
    "exercise": ""
  }
}

Medical Document Text:
{text}

Return only valid JSON without any additional text or formatting."#;

pub fn build_extraction_prompt(text: &str) -> String {
    EXTRACTION_PROMPT.replace("{text}", text)
}

/// Drop a surrounding code fence (first fence pair) and a leading `json` tag.
pub fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }

    let inner = trimmed.split("```").nth(1).unwrap_or_default();
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim()
}

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{3}[-.\s]?\d{3}[-.\s]?\d{4})").expect("valid regex"));
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid regex")
});
static BLOOD_PRESSURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2,3})/(\d{2,3})").expect("valid regex"));

/// Pattern-only extraction that never calls a service and never fails.
///
/// Only `patient_info.phone`, `patient_info.email` and `vitals.blood_pressure`
/// can be filled; the first match of each pattern wins.
pub fn fallback_extraction(text: &str) -> StructuredDocument {
    let mut document = StructuredDocument::default();

    if let Some(phone) = PHONE_RE.captures(text).and_then(|c| c.get(1)) {
        document.patient_info.phone = phone.as_str().to_string();
    }

    if let Some(email) = EMAIL_RE.find(text) {
        document.patient_info.email = email.as_str().to_string();
    }

    if let Some(bp) = BLOOD_PRESSURE_RE.captures(text) {
        document.vitals.blood_pressure = format!("{}/{}", &bp[1], &bp[2]);
    }

    document
}

/// Two-tier extraction: the injected service first, the pattern fallback when
/// the service fails or answers with something that is not JSON.
#[derive(Clone)]
pub struct StructuredExtractor {
    service: Arc<dyn StructuredExtractionService>,
}

impl StructuredExtractor {
    pub fn new(service: Arc<dyn StructuredExtractionService>) -> Self {
        Self { service }
    }

    pub async fn extract(&self, text: &str) -> Extraction {
        match self.try_service(text).await {
            Ok(document) => Extraction::Full { document },
            Err(e) => {
                warn!("Error in structured extraction, using fallback: {}", e);
                Extraction::Degraded {
                    document: fallback_extraction(text),
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_service(
        &self,
        text: &str,
    ) -> std::result::Result<StructuredDocument, ExtractionServiceError> {
        let prompt = build_extraction_prompt(text);
        let response = self
            .service
            .complete(&prompt)
            .await
            .map_err(|e| ExtractionServiceError::Service(e.to_string()))?;

        let json = strip_code_fence(&response);
        if json.is_empty() {
            return Err(ExtractionServiceError::EmptyResponse);
        }

        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(ExtractionServiceError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Extraction backed by an OpenRouter chat model through rig.
pub struct LlmExtractionService {
    api_key: String,
    model: String,
}

impl LlmExtractionService {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl StructuredExtractionService for LlmExtractionService {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let agent = get_llm_agent(&self.api_key, &self.model, EXTRACTION_PREAMBLE);
        let response = agent.prompt(prompt).await?;
        Ok(response)
    }
}

pub struct ExtractTask {
    extractor: StructuredExtractor,
}

impl ExtractTask {
    pub fn new(extractor: StructuredExtractor) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl Task for ExtractTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let mut document: DocumentRun = context
            .get(session_keys::DOCUMENT)
            .await
            .ok_or_else(|| GraphError::ContextError("Document not found in context".to_string()))?;

        let text = document
            .cleansed_text
            .as_deref()
            .ok_or_else(|| GraphError::ContextError("Cleansed text not found".to_string()))?;

        info!(run_id = %document.run_id, "Extracting structured data");
        let extraction = self.extractor.extract(text).await;

        let status = if extraction.is_degraded() {
            "Structured data extracted with pattern fallback"
        } else {
            "Structured data extracted"
        };
        info!(run_id = %document.run_id, degraded = extraction.is_degraded(), "{}", status);

        document.extraction = Some(extraction);
        context.set(session_keys::DOCUMENT, document).await?;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::Continue,
            Some(status.to_string()),
        ))
    }
}
