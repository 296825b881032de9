use super::index::ExecutionStore;
use crate::types::{ExecutionId, WorkflowExecution};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Execution store held in process memory
#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<ExecutionId, WorkflowExecution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn save(&self, execution: &WorkflowExecution) -> Result<()> {
        self.executions
            .write()
            .map_err(|_| anyhow!("Execution store lock poisoned"))?
            .insert(execution.execution_id, execution.clone());
        Ok(())
    }

    fn get(&self, execution_id: &ExecutionId) -> Result<Option<WorkflowExecution>> {
        let executions = self
            .executions
            .read()
            .map_err(|_| anyhow!("Execution store lock poisoned"))?;
        Ok(executions.get(execution_id).cloned())
    }

    fn list(&self) -> Result<Vec<WorkflowExecution>> {
        let executions = self
            .executions
            .read()
            .map_err(|_| anyhow!("Execution store lock poisoned"))?;
        let mut all: Vec<WorkflowExecution> = executions.values().cloned().collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(all)
    }
}
