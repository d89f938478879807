use std::fs;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::Row;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to replace table file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Contents of one persisted table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableFile {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone)]
pub struct PersistOutcome {
    pub path: PathBuf,
    /// False when rows were appended to an existing file
    pub created: bool,
    pub rows_appended: usize,
    pub total_rows: usize,
    pub columns: Vec<String>,
}

/// Flat CSV tables, one `<table>.csv` per table name under a root directory.
///
/// The store assumes it is the only writer of its directory.
#[derive(Debug, Clone)]
pub struct TableStore {
    root: PathBuf,
}

impl TableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{table}.csv"))
    }

    pub fn load(&self, table: &str) -> Result<Option<TableFile>> {
        let path = self.table_path(table);
        if !path.exists() {
            return Ok(None);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&path)?;

        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows: Vec<Row> = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(columns.iter().cloned().zip(record.iter()).collect());
        }

        Ok(Some(TableFile { columns, rows }))
    }

    /// Append `rows` to the table, creating it when missing.
    ///
    /// The header becomes the union of the existing columns and any new ones
    /// in first-seen order; cells a row lacks are written empty. The whole
    /// table is written to a temporary file in the same directory and then
    /// renamed over the old one.
    pub fn persist(&self, table: &str, rows: &[Row]) -> Result<PersistOutcome> {
        fs::create_dir_all(&self.root)?;
        let path = self.table_path(table);

        let (mut columns, mut all_rows, created) = match self.load(table)? {
            Some(existing) => (existing.columns, existing.rows, false),
            None => (Vec::new(), Vec::new(), true),
        };

        for row in rows {
            for column in row.columns() {
                if !columns.iter().any(|known| known == column) {
                    columns.push(column.to_string());
                }
            }
        }
        all_rows.extend_from_slice(rows);

        let mut temp = NamedTempFile::new_in(&self.root)?;
        {
            let mut writer = csv::Writer::from_writer(temp.as_file_mut());
            writer.write_record(&columns)?;
            for row in &all_rows {
                writer.write_record(columns.iter().map(|column| row.get(column).unwrap_or("")))?;
            }
            writer.flush()?;
        }
        if let Some(permissions) = table_permissions(&path)? {
            temp.as_file().set_permissions(permissions)?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&path)?;

        if created {
            info!(table, rows = rows.len(), "Created table file");
        } else {
            info!(table, rows = rows.len(), "Appended to table file");
        }
        debug!(path = %path.display(), columns = columns.len(), "Table written");

        Ok(PersistOutcome {
            path,
            created,
            rows_appended: rows.len(),
            total_rows: all_rows.len(),
            columns,
        })
    }
}

/// Permissions the rewritten table should carry: the existing file's, or the
/// usual 0644 for a new table. Temporary files start out owner-only.
fn table_permissions(path: &Path) -> Result<Option<fs::Permissions>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.permissions())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(new_table_permissions()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn new_table_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn new_table_permissions() -> Option<fs::Permissions> {
    None
}
