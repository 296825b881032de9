use crate::types::{ExecutionId, SkipReason, StepId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// An event emitted while a workflow run progresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub execution_id: ExecutionId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
}

impl Event {
    pub fn new(execution_id: ExecutionId, event_type: EventType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            execution_id,
            timestamp: Utc::now(),
            event_type,
        }
    }
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    // Run lifecycle events
    RunStarted {
        workflow_id: WorkflowId,
        total_nodes: usize,
    },
    RunCompleted {
        success_rate: f64,
        duration_ms: u64,
    },
    RunCancelled,

    // Node lifecycle events
    NodeStarted {
        node_id: StepId,
        attempt: u32,
    },
    NodeSucceeded {
        node_id: StepId,
        duration_ms: u64,
    },
    NodeFailed {
        node_id: StepId,
        error: String,
        attempt: u32,
        will_retry: bool,
    },
    NodeSkipped {
        node_id: StepId,
        reason: SkipReason,
    },
}

/// Event log writer trait
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event to the log
    async fn append(&self, event: Event) -> anyhow::Result<()>;

    /// Get all events for a run
    async fn get_execution_events(&self, execution_id: ExecutionId) -> anyhow::Result<Vec<Event>>;

    /// Drop every recorded event
    async fn clear(&self) -> anyhow::Result<()>;
}

/// Event log held in process memory
#[derive(Default)]
pub struct InMemoryEventLog {
    events: RwLock<Vec<Event>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: Event) -> anyhow::Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn get_execution_events(&self, execution_id: ExecutionId) -> anyhow::Result<Vec<Event>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.events.write().await.clear();
        Ok(())
    }
}
