//! Fixed schema tables shared by every document in the process.
//!
//! Output tables and their canonical columns are an external contract with the
//! relational store the files are loaded into. Categories tie the structured
//! document to its note key and the keywords used for context annotation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the fixed output tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    PatientsRegistration,
    MedicalHistory,
    AllergyRecords,
    Prescription,
    VitalsHistory,
    Bloodtests,
    Diagnosis,
    SymptomsChecker,
    FamilyHistory,
    SocialHistory,
}

impl Table {
    pub const ALL: [Table; 10] = [
        Table::PatientsRegistration,
        Table::MedicalHistory,
        Table::AllergyRecords,
        Table::Prescription,
        Table::VitalsHistory,
        Table::Bloodtests,
        Table::Diagnosis,
        Table::SymptomsChecker,
        Table::FamilyHistory,
        Table::SocialHistory,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::PatientsRegistration => "patients_registration",
            Table::MedicalHistory => "medical_history",
            Table::AllergyRecords => "allergy_records",
            Table::Prescription => "prescription",
            Table::VitalsHistory => "vitals_history",
            Table::Bloodtests => "bloodtests",
            Table::Diagnosis => "diagnosis",
            Table::SymptomsChecker => "symptoms_checker",
            Table::FamilyHistory => "family_history",
            Table::SocialHistory => "social_history",
        }
    }

    /// Canonical columns the downstream store expects for this table.
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            Table::PatientsRegistration => &[
                "patient_id",
                "first_name",
                "last_name",
                "date_of_birth",
                "gender",
                "phone",
                "email",
                "address",
                "emergency_contact",
            ],
            Table::MedicalHistory => &[
                "patient_id",
                "condition",
                "diagnosis_date",
                "status",
                "notes",
                "doctor_id",
            ],
            Table::AllergyRecords => &[
                "patient_id",
                "allergen",
                "reaction_type",
                "severity",
                "date_recorded",
            ],
            Table::Prescription => &[
                "patient_id",
                "medication",
                "dosage",
                "frequency",
                "start_date",
                "end_date",
                "doctor_id",
            ],
            Table::VitalsHistory => &[
                "patient_id",
                "blood_pressure_systolic",
                "blood_pressure_diastolic",
                "heart_rate",
                "temperature",
                "weight",
                "height",
                "date_recorded",
            ],
            Table::Bloodtests => &[
                "patient_id",
                "test_type",
                "result_value",
                "unit",
                "reference_range",
                "test_date",
                "lab_id",
            ],
            Table::Diagnosis => &[
                "patient_id",
                "primary_diagnosis",
                "secondary_diagnosis",
                "icd_code",
                "diagnosis_date",
                "doctor_id",
            ],
            Table::SymptomsChecker => &[
                "patient_id",
                "symptom",
                "severity",
                "duration",
                "date_reported",
            ],
            Table::FamilyHistory => &[
                "patient_id",
                "relation",
                "condition",
                "age_of_onset",
                "status",
            ],
            Table::SocialHistory => &[
                "patient_id",
                "smoking_status",
                "alcohol_use",
                "drug_use",
                "exercise_frequency",
                "occupation",
            ],
        }
    }

    /// File name of the table inside the output destination.
    pub fn file_name(&self) -> String {
        format!("{}.csv", self.name())
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One of the semantic groupings of a structured document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    PatientInfo,
    Vitals,
    Medications,
    Allergies,
    Diagnoses,
    LabResults,
    Symptoms,
    FamilyHistory,
    SocialHistory,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::PatientInfo,
        Category::Vitals,
        Category::Medications,
        Category::Allergies,
        Category::Diagnoses,
        Category::LabResults,
        Category::Symptoms,
        Category::FamilyHistory,
        Category::SocialHistory,
    ];

    pub fn notes_key(&self) -> &'static str {
        match self {
            Category::PatientInfo => "patient_notes",
            Category::Vitals => "vitals_notes",
            Category::Medications => "medication_notes",
            Category::Allergies => "allergy_notes",
            Category::Diagnoses => "diagnosis_notes",
            Category::LabResults => "lab_notes",
            Category::Symptoms => "symptom_notes",
            Category::FamilyHistory => "family_history_notes",
            Category::SocialHistory => "social_history_notes",
        }
    }

    /// Lower-case keywords; a sentence mentioning any of them is relevant.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Category::PatientInfo => &[
                "chief complaint",
                "reason for visit",
                "history of present illness",
                "background",
                "overview",
            ],
            Category::Vitals => &[
                "vital signs",
                "physical examination",
                "physical exam",
                "assessment",
                "measurements",
            ],
            Category::Medications => &[
                "medications",
                "prescriptions",
                "therapy",
                "treatment plan",
                "drug therapy",
            ],
            Category::Allergies => &[
                "allergies",
                "allergic reactions",
                "adverse reactions",
                "sensitivities",
            ],
            Category::Diagnoses => &[
                "diagnosis",
                "impression",
                "findings",
                "assessment",
                "conclusion",
            ],
            Category::LabResults => &[
                "laboratory results",
                "lab results",
                "test results",
                "laboratory",
                "pathology",
            ],
            Category::Symptoms => &["symptoms", "complaints", "presentation", "manifestations"],
            Category::FamilyHistory => &[
                "family history",
                "hereditary",
                "genetic history",
                "familial",
            ],
            Category::SocialHistory => &[
                "social history",
                "lifestyle",
                "habits",
                "occupation",
                "smoking",
                "alcohol",
            ],
        }
    }

    /// Table this category's records are written to.
    pub fn table(&self) -> Table {
        match self {
            Category::PatientInfo => Table::PatientsRegistration,
            Category::Vitals => Table::VitalsHistory,
            Category::Medications => Table::Prescription,
            Category::Allergies => Table::AllergyRecords,
            Category::Diagnoses => Table::Diagnosis,
            Category::LabResults => Table::Bloodtests,
            Category::Symptoms => Table::SymptomsChecker,
            Category::FamilyHistory => Table::FamilyHistory,
            Category::SocialHistory => Table::SocialHistory,
        }
    }
}

/// Medical shorthand expanded during normalization, applied in this order.
/// `w/o` precedes `w/` so the longer form is not split.
pub const ABBREVIATIONS: &[(&str, &str)] = &[
    ("w/o", "without"),
    ("w/", "with"),
    ("hx", "history"),
    ("dx", "diagnosis"),
    ("rx", "prescription"),
    ("pt", "patient"),
    ("dob", "date of birth"),
    ("bp", "blood pressure"),
    ("hr", "heart rate"),
    ("temp", "temperature"),
];

/// Sub-folder of the output destination that receives the table files.
pub const TABLES_DIR: &str = "csv_database_ready";
