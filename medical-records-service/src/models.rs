use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::schema::{Category, Table};

/// Schema-shaped extraction result for one source document.
///
/// Every field is always present; unknown values are empty strings or empty
/// sequences. Deserialization is lenient so that whatever shape the extraction
/// service returns, readers never have to deal with missing keys. Category keys
/// are accepted in lower or upper case; when both spellings are present the
/// first one carrying data wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructuredDocument {
    pub patient_info: PatientInfo,
    pub vitals: Vitals,
    pub medications: Vec<Medication>,
    pub allergies: Vec<Allergy>,
    pub diagnoses: Vec<Diagnosis>,
    pub lab_results: Vec<LabResult>,
    pub symptoms: Vec<Symptom>,
    pub family_history: Vec<FamilyHistoryEntry>,
    pub social_history: SocialHistory,
}

impl<'de> Deserialize<'de> for StructuredDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self {
            patient_info: lenient::record(&map, &["patient_info", "PATIENT_INFO"]),
            vitals: lenient::record(&map, &["vitals", "VITALS"]),
            medications: lenient::list(&map, &["medications", "MEDICATIONS"]),
            allergies: lenient::list(&map, &["allergies", "ALLERGIES"]),
            diagnoses: lenient::list(&map, &["diagnoses", "DIAGNOSES"]),
            lab_results: lenient::list(&map, &["lab_results", "LAB_RESULTS"]),
            symptoms: lenient::list(&map, &["symptoms", "SYMPTOMS"]),
            family_history: lenient::list(&map, &["family_history", "FAMILY_HISTORY"]),
            social_history: lenient::record(&map, &["social_history", "SOCIAL_HISTORY"]),
        })
    }
}

/// Declares a record whose fields are all strings, deserialized leniently.
///
/// `#[alias(..)]` lists extra keys accepted for a field; the first key with a
/// non-empty value wins.
macro_rules! text_record {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[alias($($alias:literal),+)])? pub $field:ident ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize)]
        pub struct $name {
            $( pub $field: String, )*
        }

        impl $name {
            /// True when no field carries a value.
            pub fn is_empty(&self) -> bool {
                true $(&& self.$field.is_empty())*
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let map = Map::<String, Value>::deserialize(deserializer)?;
                Ok(Self {
                    $( $field: lenient::text(&map, &[stringify!($field) $($(, $alias)+)?]), )*
                })
            }
        }
    };
}

text_record! {
    pub struct PatientInfo {
        pub name,
        #[alias("dob")]
        pub date_of_birth,
        pub gender,
        pub phone,
        pub email,
        pub address,
        #[alias("mrn")]
        pub medical_record_number,
    }
}

text_record! {
    pub struct Vitals {
        pub blood_pressure,
        pub heart_rate,
        pub temperature,
        pub weight,
        pub height,
        pub date,
    }
}

text_record! {
    pub struct Medication {
        pub name,
        pub dosage,
        pub frequency,
        pub start_date,
        pub end_date,
        pub instructions,
    }
}

text_record! {
    pub struct Allergy {
        pub allergen,
        pub reaction,
        pub severity,
    }
}

text_record! {
    pub struct Diagnosis {
        pub condition,
        pub icd_code,
        pub date,
        pub status,
    }
}

text_record! {
    pub struct LabResult {
        pub test_name,
        pub result,
        pub unit,
        pub reference_range,
        pub date,
    }
}

text_record! {
    pub struct Symptom {
        pub symptom,
        pub severity,
        pub duration,
        pub date,
    }
}

text_record! {
    pub struct FamilyHistoryEntry {
        pub relation,
        pub condition,
        pub age_of_onset,
    }
}

text_record! {
    pub struct SocialHistory {
        pub smoking,
        pub alcohol,
        pub occupation,
        pub exercise,
    }
}

/// How a structured document was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Extraction {
    /// The extraction service answered with parseable JSON
    Full { document: StructuredDocument },
    /// The service failed; only the pattern-based fallback fields are set
    Degraded {
        document: StructuredDocument,
        reason: String,
    },
}

impl Extraction {
    pub fn document(&self) -> &StructuredDocument {
        match self {
            Extraction::Full { document } | Extraction::Degraded { document, .. } => document,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Extraction::Degraded { .. })
    }
}

/// Keyword-matched excerpts per category plus the cleaned full document text.
///
/// A category without a match has no entry at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryContext {
    pub full_text: String,
    pub snippets: BTreeMap<Category, String>,
}

impl CategoryContext {
    pub fn snippet(&self, category: Category) -> Option<&str> {
        self.snippets.get(&category).map(String::as_str)
    }
}

/// One table row: ordered column/value pairs, values always strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row(Vec<(String, String)>);

impl Row {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Set a column, keeping the original position when it already exists.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.0.iter_mut().find(|(name, _)| *name == column) {
            Some(entry) => entry.1 = value,
            None => self.0.push((column, value)),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.set(column, value);
        }
        row
    }
}

/// Rows per output table for one document, in arrival order.
///
/// A table key is present only when the document had data for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseRecordSet(BTreeMap<Table, Vec<Row>>);

impl DatabaseRecordSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, table: Table, rows: Vec<Row>) {
        self.0.insert(table, rows);
    }

    pub fn get(&self, table: Table) -> Option<&[Row]> {
        self.0.get(&table).map(Vec::as_slice)
    }

    pub fn contains(&self, table: Table) -> bool {
        self.0.contains_key(&table)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Table, &[Row])> {
        self.0.iter().map(|(table, rows)| (*table, rows.as_slice()))
    }

    pub fn total_records(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// State of one document travelling through the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRun {
    pub run_id: String,
    pub patient_id: String,
    pub source_path: PathBuf,
    /// File name recorded as provenance on every row
    pub source_file: String,
    pub tables_dir: PathBuf,
    pub raw_text: Option<String>,
    pub cleansed_text: Option<String>,
    pub extraction: Option<Extraction>,
    pub context: Option<CategoryContext>,
    pub records: Option<DatabaseRecordSet>,
    pub tables_written: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub patient_id: String,
    pub output_folder: String,
    pub selected_files: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub success: bool,
    pub batch_id: String,
    pub total_files: usize,
    pub processed_files: usize,
    pub failed_files: usize,
    pub skipped_files: usize,
    pub total_records: usize,
    pub files_processed: Vec<ProcessedFile>,
    pub files_failed: Vec<FailedFile>,
    pub csv_files_created: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedFile {
    pub filename: String,
    pub records_created: usize,
    pub degraded_extraction: bool,
    pub tables_written: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedFile {
    pub filename: String,
    pub error: String,
}

/// A candidate input file found in a folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableFile {
    pub path: String,
    pub name: String,
    pub size_mb: f64,
    pub modified: String,
}

mod lenient {
    use serde::de::DeserializeOwned;
    use serde_json::{Map, Value};

    fn is_blank(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(fields) => fields.is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        }
    }

    /// The value of the first key carrying data, else of the first key present.
    fn pick(map: &Map<String, Value>, keys: &[&str]) -> Value {
        let present = move || keys.iter().filter_map(move |key| map.get(*key));
        present()
            .find(|value| !is_blank(value))
            .or_else(|| present().next())
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Scalars become their text form, `null` becomes empty.
    pub fn text(map: &Map<String, Value>, keys: &[&str]) -> String {
        render(pick(map, keys))
    }

    /// A record of the wrong shape is treated as empty.
    pub fn record<T: DeserializeOwned + Default>(map: &Map<String, Value>, keys: &[&str]) -> T {
        serde_json::from_value(pick(map, keys)).unwrap_or_default()
    }

    /// Entries that do not fit the record shape are skipped.
    pub fn list<T: DeserializeOwned>(map: &Map<String, Value>, keys: &[&str]) -> Vec<T> {
        match pick(map, keys) {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn render(value: Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::String(s) => s,
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(items) => items
                .into_iter()
                .map(render)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
            Value::Object(_) => value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_keys_become_empty_values() {
        let doc: StructuredDocument = serde_json::from_value(json!({
            "patient_info": { "name": "Jane Doe" }
        }))
        .unwrap();

        assert_eq!(doc.patient_info.name, "Jane Doe");
        assert_eq!(doc.patient_info.phone, "");
        assert!(doc.vitals.is_empty());
        assert!(doc.medications.is_empty());
    }

    #[test]
    fn test_serialized_document_carries_every_key() {
        let value = serde_json::to_value(StructuredDocument::default()).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 9);
        assert_eq!(value["vitals"]["blood_pressure"], json!(""));
        assert_eq!(value["social_history"].as_object().unwrap().len(), 4);
    }

    #[test]
    fn test_uppercase_categories_and_short_aliases() {
        let doc: StructuredDocument = serde_json::from_value(json!({
            "PATIENT_INFO": { "name": "John Smith", "dob": "1/1/1980", "mrn": "MRN-9" },
            "VITALS": { "heart_rate": 72, "temperature": 98.6 },
            "MEDICATIONS": [{ "name": "Lisinopril", "dosage": "10mg" }]
        }))
        .unwrap();

        assert_eq!(doc.patient_info.date_of_birth, "1/1/1980");
        assert_eq!(doc.patient_info.medical_record_number, "MRN-9");
        assert_eq!(doc.vitals.heart_rate, "72");
        assert_eq!(doc.vitals.temperature, "98.6");
        assert_eq!(doc.medications[0].name, "Lisinopril");
    }

    #[test]
    fn test_field_and_alias_together_keep_the_record() {
        let doc: StructuredDocument = serde_json::from_str(
            r#"{"patient_info":{"name":"Jane Doe","date_of_birth":"1980-01-01","dob":"1980-01-01","phone":"555"}}"#,
        )
        .unwrap();

        assert_eq!(doc.patient_info.name, "Jane Doe");
        assert_eq!(doc.patient_info.date_of_birth, "1980-01-01");
        assert_eq!(doc.patient_info.phone, "555");
    }

    #[test]
    fn test_first_non_empty_spelling_wins() {
        let doc: StructuredDocument = serde_json::from_value(json!({
            "patient_info": { "date_of_birth": "", "dob": "1/1/1980", "mrn": "MRN-1", "medical_record_number": "MRN-2" },
            "medications": [],
            "MEDICATIONS": [{ "name": "Aspirin" }],
            "VITALS": { "heart_rate": "70" },
            "vitals": { "heart_rate": "72" }
        }))
        .unwrap();

        assert_eq!(doc.patient_info.date_of_birth, "1/1/1980");
        assert_eq!(doc.patient_info.medical_record_number, "MRN-2");
        assert_eq!(doc.medications.len(), 1);
        assert_eq!(doc.medications[0].name, "Aspirin");
        assert_eq!(doc.vitals.heart_rate, "72");
    }

    #[test]
    fn test_serialized_document_reads_back_unchanged() {
        let mut doc = StructuredDocument::default();
        doc.patient_info.date_of_birth = "1980-01-01".to_string();
        doc.allergies.push(Allergy {
            allergen: "Latex".to_string(),
            ..Default::default()
        });

        let back: StructuredDocument =
            serde_json::from_value(serde_json::to_value(&doc).unwrap()).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_wrong_shapes_are_tolerated() {
        let doc: StructuredDocument = serde_json::from_value(json!({
            "patient_info": "unknown",
            "vitals": null,
            "allergies": { "allergen": "peanuts" },
            "symptoms": ["cough", { "symptom": "fever", "duration": ["3", "days"] }],
            "social_history": { "smoking": null, "alcohol": false }
        }))
        .unwrap();

        assert!(doc.patient_info.is_empty());
        assert!(doc.vitals.is_empty());
        assert!(doc.allergies.is_empty());
        assert_eq!(doc.symptoms.len(), 1);
        assert_eq!(doc.symptoms[0].duration, "3, days");
        assert_eq!(doc.social_history.smoking, "");
        assert_eq!(doc.social_history.alcohol, "false");
    }

    #[test]
    fn test_row_keeps_column_order_and_replaces_in_place() {
        let mut row = Row::new().with("patient_id", "p1").with("notes", "a");
        row.set("source_file", "scan.png");
        row.set("notes", "b");

        assert_eq!(
            row.columns().collect::<Vec<_>>(),
            vec!["patient_id", "notes", "source_file"]
        );
        assert_eq!(row.get("notes"), Some("b"));
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn test_record_set_counts_rows_across_tables() {
        let mut records = DatabaseRecordSet::new();
        records.insert(Table::Prescription, vec![Row::new(), Row::new()]);
        records.insert(Table::AllergyRecords, Vec::new());

        assert_eq!(records.total_records(), 2);
        assert!(records.contains(Table::AllergyRecords));
        assert!(!records.contains(Table::Diagnosis));
        let tables: Vec<_> = records.iter().map(|(table, _)| table).collect();
        assert_eq!(tables, vec![Table::AllergyRecords, Table::Prescription]);
    }

    #[test]
    fn test_extraction_exposes_document_and_mode() {
        let degraded = Extraction::Degraded {
            document: StructuredDocument::default(),
            reason: "service unavailable".to_string(),
        };
        assert!(degraded.is_degraded());
        assert_eq!(degraded.document(), &StructuredDocument::default());

        let value = serde_json::to_value(&degraded).unwrap();
        assert_eq!(value["mode"], json!("degraded"));
    }
}
