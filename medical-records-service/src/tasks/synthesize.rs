use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

use super::session_keys;
use crate::flow::{Context, GraphError, NextAction, Result, Task, TaskResult};
use crate::models::{CategoryContext, DatabaseRecordSet, DocumentRun, Row, StructuredDocument};
use crate::schema::{Category, Table};

/// Composed notes text per category
pub type CategoryNotes = BTreeMap<Category, String>;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn processing_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// The note for one category: the full document text, prefixed by the
/// category's specific context when one was found.
pub fn compose_note(snippet: Option<&str>, full_text: &str) -> String {
    match snippet {
        Some(context) => format!("[SPECIFIC CONTEXT]: {context}\n\n[FULL DOCUMENT]: {full_text}"),
        None => full_text.to_string(),
    }
}

pub fn compose_notes(context: &CategoryContext) -> CategoryNotes {
    Category::ALL
        .iter()
        .map(|category| {
            let note = compose_note(context.snippet(*category), &context.full_text);
            (*category, note)
        })
        .collect()
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() { default } else { value }
}

/// Map a structured document to rows for the output tables, stamping every
/// row with the patient id, source file and the category's note.
pub fn synthesize(
    document: &StructuredDocument,
    notes: &CategoryNotes,
    source_file: &str,
    patient_id: &str,
) -> DatabaseRecordSet {
    synthesize_at(
        document,
        notes,
        source_file,
        patient_id,
        &processing_timestamp(),
    )
}

/// [`synthesize`] with an explicit processing timestamp.
pub fn synthesize_at(
    document: &StructuredDocument,
    notes: &CategoryNotes,
    source_file: &str,
    patient_id: &str,
    timestamp: &str,
) -> DatabaseRecordSet {
    let note = |category: Category| notes.get(&category).map(String::as_str).unwrap_or_default();
    let base = || Row::new().with("patient_id", patient_id);
    let mut records = DatabaseRecordSet::new();

    let patient = &document.patient_info;
    if !patient.is_empty() {
        let mut name_parts = patient.name.split_whitespace();
        let first_name = name_parts.next().unwrap_or_default();
        let last_name = name_parts.collect::<Vec<_>>().join(" ");

        let row = base()
            .with("first_name", first_name)
            .with("last_name", last_name)
            .with("date_of_birth", patient.date_of_birth.as_str())
            .with("gender", patient.gender.as_str())
            .with("phone", patient.phone.as_str())
            .with("email", patient.email.as_str())
            .with("address", patient.address.as_str())
            .with("emergency_contact", "")
            .with("medical_record_number", patient.medical_record_number.as_str())
            .with("notes", note(Category::PatientInfo))
            .with("source_file", source_file)
            .with("processed_date", timestamp);
        records.insert(Table::PatientsRegistration, vec![row]);
    }

    let vitals = &document.vitals;
    if !vitals.is_empty() {
        let mut bp_parts = vitals.blood_pressure.split('/').map(str::trim);
        let systolic = bp_parts.next().unwrap_or_default();
        let diastolic = bp_parts.next().unwrap_or_default();

        let row = base()
            .with("blood_pressure_systolic", systolic)
            .with("blood_pressure_diastolic", diastolic)
            .with("heart_rate", vitals.heart_rate.as_str())
            .with("temperature", vitals.temperature.as_str())
            .with("weight", vitals.weight.as_str())
            .with("height", vitals.height.as_str())
            .with("date_recorded", or_default(&vitals.date, timestamp))
            .with("notes", note(Category::Vitals))
            .with("source_file", source_file);
        records.insert(Table::VitalsHistory, vec![row]);
    }

    if !document.medications.is_empty() {
        let rows = document
            .medications
            .iter()
            .filter(|med| !med.name.is_empty())
            .map(|med| {
                base()
                    .with("medication", med.name.as_str())
                    .with("dosage", med.dosage.as_str())
                    .with("frequency", med.frequency.as_str())
                    .with("start_date", or_default(&med.start_date, timestamp))
                    .with("end_date", med.end_date.as_str())
                    .with("doctor_id", "")
                    .with("instructions", med.instructions.as_str())
                    .with("notes", note(Category::Medications))
                    .with("source_file", source_file)
            })
            .collect();
        records.insert(Table::Prescription, rows);
    }

    if !document.allergies.is_empty() {
        let rows = document
            .allergies
            .iter()
            .filter(|allergy| !allergy.allergen.is_empty())
            .map(|allergy| {
                base()
                    .with("allergen", allergy.allergen.as_str())
                    .with("reaction_type", allergy.reaction.as_str())
                    .with("severity", allergy.severity.as_str())
                    .with("date_recorded", timestamp)
                    .with("notes", note(Category::Allergies))
                    .with("source_file", source_file)
            })
            .collect();
        records.insert(Table::AllergyRecords, rows);
    }

    if !document.diagnoses.is_empty() {
        let rows = document
            .diagnoses
            .iter()
            .filter(|diagnosis| !diagnosis.condition.is_empty())
            .map(|diagnosis| {
                base()
                    .with("primary_diagnosis", diagnosis.condition.as_str())
                    .with("secondary_diagnosis", "")
                    .with("icd_code", diagnosis.icd_code.as_str())
                    .with("diagnosis_date", or_default(&diagnosis.date, timestamp))
                    .with("doctor_id", "")
                    .with("status", or_default(&diagnosis.status, "active"))
                    .with("notes", note(Category::Diagnoses))
                    .with("source_file", source_file)
            })
            .collect();
        records.insert(Table::Diagnosis, rows);
    }

    if !document.lab_results.is_empty() {
        let rows = document
            .lab_results
            .iter()
            .filter(|lab| !lab.test_name.is_empty())
            .map(|lab| {
                base()
                    .with("test_type", lab.test_name.as_str())
                    .with("result_value", lab.result.as_str())
                    .with("unit", lab.unit.as_str())
                    .with("reference_range", lab.reference_range.as_str())
                    .with("test_date", or_default(&lab.date, timestamp))
                    .with("lab_id", "")
                    .with("notes", note(Category::LabResults))
                    .with("source_file", source_file)
            })
            .collect();
        records.insert(Table::Bloodtests, rows);
    }

    if !document.symptoms.is_empty() {
        let rows = document
            .symptoms
            .iter()
            .filter(|symptom| !symptom.symptom.is_empty())
            .map(|symptom| {
                base()
                    .with("symptom", symptom.symptom.as_str())
                    .with("severity", symptom.severity.as_str())
                    .with("duration", symptom.duration.as_str())
                    .with("date_reported", or_default(&symptom.date, timestamp))
                    .with("notes", note(Category::Symptoms))
                    .with("source_file", source_file)
            })
            .collect();
        records.insert(Table::SymptomsChecker, rows);
    }

    if !document.family_history.is_empty() {
        let rows = document
            .family_history
            .iter()
            .filter(|entry| !entry.condition.is_empty())
            .map(|entry| {
                base()
                    .with("relation", entry.relation.as_str())
                    .with("condition", entry.condition.as_str())
                    .with("age_of_onset", entry.age_of_onset.as_str())
                    .with("status", "reported")
                    .with("notes", note(Category::FamilyHistory))
                    .with("source_file", source_file)
            })
            .collect();
        records.insert(Table::FamilyHistory, rows);
    }

    let social = &document.social_history;
    if !social.is_empty() {
        let row = base()
            .with("smoking_status", social.smoking.as_str())
            .with("alcohol_use", social.alcohol.as_str())
            .with("drug_use", "")
            .with("exercise_frequency", social.exercise.as_str())
            .with("occupation", social.occupation.as_str())
            .with("notes", note(Category::SocialHistory))
            .with("source_file", source_file);
        records.insert(Table::SocialHistory, vec![row]);
    }

    records
}

pub struct SynthesizeTask;

#[async_trait]
impl Task for SynthesizeTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let mut document: DocumentRun = context
            .get(session_keys::DOCUMENT)
            .await
            .ok_or_else(|| GraphError::ContextError("Document not found in context".to_string()))?;

        let extraction = document
            .extraction
            .as_ref()
            .ok_or_else(|| GraphError::ContextError("Extraction not found".to_string()))?;
        let annotation = document
            .context
            .as_ref()
            .ok_or_else(|| GraphError::ContextError("Category context not found".to_string()))?;

        let notes = compose_notes(annotation);
        let records = synthesize(
            extraction.document(),
            &notes,
            &document.source_file,
            &document.patient_id,
        );

        info!(
            run_id = %document.run_id,
            tables = records.iter().count(),
            records = records.total_records(),
            "Converted to database format"
        );

        context
            .set(session_keys::HAS_RECORDS, !records.is_empty())
            .await?;
        document.records = Some(records);
        context.set(session_keys::DOCUMENT, document).await?;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::Continue,
            Some("Records synthesized".to_string()),
        ))
    }
}
