use crate::types::{ExecutionId, WorkflowExecution};
use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::PathBuf;
use std::sync::Arc;

const EXECUTIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("executions");

/// Durable history of workflow executions
pub trait ExecutionStore: Send + Sync {
    /// Insert or replace an execution
    fn save(&self, execution: &WorkflowExecution) -> Result<()>;

    /// Get an execution by ID
    fn get(&self, execution_id: &ExecutionId) -> Result<Option<WorkflowExecution>>;

    /// List all executions, newest first
    fn list(&self) -> Result<Vec<WorkflowExecution>>;
}

/// Execution store backed by an embedded redb file
#[derive(Clone)]
pub struct RedbExecutionStore {
    db: Arc<Database>,
}

impl RedbExecutionStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create store directory")?;
        }

        let db = Database::create(&path).context("Failed to create redb database")?;

        // Initialize tables
        let write_txn = db.begin_write().context("Failed to begin write transaction")?;
        {
            let _executions_table = write_txn
                .open_table(EXECUTIONS_TABLE)
                .context("Failed to open executions table")?;
        }
        write_txn.commit().context("Failed to commit transaction")?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl ExecutionStore for RedbExecutionStore {
    fn save(&self, execution: &WorkflowExecution) -> Result<()> {
        let write_txn = self.db.begin_write().context("Failed to begin write")?;
        {
            let mut table = write_txn
                .open_table(EXECUTIONS_TABLE)
                .context("Failed to open table")?;

            let key = execution.execution_id.to_string();
            let value = serde_json::to_vec(execution).context("Failed to serialize execution")?;

            table
                .insert(key.as_str(), value.as_slice())
                .context("Failed to insert execution")?;
        }
        write_txn.commit().context("Failed to commit")?;
        Ok(())
    }

    fn get(&self, execution_id: &ExecutionId) -> Result<Option<WorkflowExecution>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(EXECUTIONS_TABLE)
            .context("Failed to open table")?;

        let key = execution_id.to_string();
        let value = table.get(key.as_str()).context("Failed to get execution")?;

        match value {
            Some(guard) => {
                let execution: WorkflowExecution = serde_json::from_slice(guard.value())
                    .context("Failed to deserialize execution")?;
                Ok(Some(execution))
            }
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<WorkflowExecution>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(EXECUTIONS_TABLE)
            .context("Failed to open table")?;

        let mut executions = Vec::new();
        for item in table.iter().context("Failed to iterate executions")? {
            let (_key, value) = item.context("Failed to read item")?;
            let execution: WorkflowExecution = serde_json::from_slice(value.value())
                .context("Failed to deserialize execution")?;
            executions.push(execution);
        }

        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(executions)
    }
}
