use async_trait::async_trait;
use tracing::{info, warn};

use super::session_keys;
use crate::error::PipelineError;
use crate::flow::{Context, GraphError, NextAction, Result, Task, TaskResult};
use crate::models::{DatabaseRecordSet, DocumentRun};
use crate::store::TableStore;

/// Write every non-empty table of a record set, in table order.
///
/// Returns the file names written. Stops at the first failing table; tables
/// written before it stay on disk.
pub fn persist_records(
    store: &TableStore,
    records: &DatabaseRecordSet,
) -> std::result::Result<Vec<String>, PipelineError> {
    let mut written = Vec::new();

    for (table, rows) in records.iter() {
        if rows.is_empty() {
            continue;
        }
        let outcome = store
            .persist(table.name(), rows)
            .map_err(|source| PipelineError::Persistence {
                table: table.name().to_string(),
                source,
            })?;
        info!(
            table = %table,
            rows = outcome.rows_appended,
            total = outcome.total_rows,
            "Saved records to {}",
            table.file_name()
        );
        written.push(table.file_name());
    }

    Ok(written)
}

pub struct PersistTask;

#[async_trait]
impl Task for PersistTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let mut document: DocumentRun = context
            .get(session_keys::DOCUMENT)
            .await
            .ok_or_else(|| GraphError::ContextError("Document not found in context".to_string()))?;

        let Some(records) = document.records.clone() else {
            warn!(run_id = %document.run_id, "No records to persist");
            return Ok(TaskResult::new(None, NextAction::End));
        };

        let store = TableStore::new(&document.tables_dir);
        let written = tokio::task::spawn_blocking(move || persist_records(&store, &records))
            .await
            .map_err(|e| GraphError::TaskExecutionFailed(format!("Persist task panicked: {e}")))??;

        info!(
            run_id = %document.run_id,
            tables = written.len(),
            "Persisted records for {}",
            document.source_file
        );

        let response = written.join(", ");
        document.tables_written = written;
        context.set(session_keys::DOCUMENT, document).await?;

        Ok(TaskResult::new_with_status(
            Some(response),
            NextAction::End,
            Some("Records persisted".to_string()),
        ))
    }
}
