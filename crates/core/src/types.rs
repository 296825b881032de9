use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a workflow definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a workflow step (and its runtime node)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a single workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ExecutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Specification for a workflow (DAG of steps)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub version: String,
    pub steps: Vec<Step>,
    /// Step id -> prerequisite step ids. Absent entries mean no dependencies.
    #[serde(default)]
    pub dependencies: HashMap<StepId, Vec<StepId>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkflowDefinition {
    /// Prerequisites of a step, empty when it has no entry
    pub fn dependencies_of(&self, step_id: &StepId) -> &[StepId] {
        self.dependencies
            .get(step_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn step(&self, step_id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == step_id)
    }
}

/// Kind of executor a step is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Agent,
    Service,
}

/// Specification for a single workflow step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: StepKind,
    /// Required when `kind` is `Agent`
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    /// Name of a boolean flag looked up in the run's input context
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Step {
    pub fn agent(id: impl Into<String>, name: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            id: StepId::new(id),
            name: name.into(),
            description: None,
            kind: StepKind::Agent,
            agent_id: Some(agent_id.into()),
            retry_policy: None,
            condition: None,
            timeout_ms: None,
        }
    }

    pub fn service(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: StepId::new(id),
            name: name.into(),
            description: None,
            kind: StepKind::Service,
            agent_id: None,
            retry_policy: None,
            condition: None,
            timeout_ms: None,
        }
    }

    /// Executor binding: the agent id, or the step id for unbound services
    pub fn executor_id(&self) -> String {
        self.agent_id.clone().unwrap_or_else(|| self.id.0.clone())
    }
}

/// Retry policy for a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1000,
        }
    }
}

/// The engine's runtime view of a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub node_id: StepId,
    pub agent_id: String,
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<StepId>,
    /// Higher is dispatched first under the priority strategy
    #[serde(default)]
    pub priority: i32,
    /// Total attempts allowed; engine default when absent
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub backoff_ms: Option<u64>,
}

impl WorkflowNode {
    pub fn new(node_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let node_id = StepId::new(node_id);
        Self {
            name: node_id.0.clone(),
            node_id,
            agent_id: agent_id.into(),
            dependencies: Vec::new(),
            priority: 0,
            retry_count: None,
            condition: None,
            timeout_ms: None,
            backoff_ms: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(StepId::new));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Runtime view of a definition step
    pub fn from_step(step: &Step, dependencies: &[StepId]) -> Self {
        Self {
            node_id: step.id.clone(),
            agent_id: step.executor_id(),
            name: step.name.clone(),
            dependencies: dependencies.to_vec(),
            priority: 0,
            retry_count: step.retry_policy.as_ref().map(|p| p.max_attempts),
            condition: step.condition.clone(),
            timeout_ms: step.timeout_ms,
            backoff_ms: step.retry_policy.as_ref().map(|p| p.backoff_ms),
        }
    }

    /// Definition step for this node, used for validation
    pub fn to_step(&self) -> Step {
        Step {
            id: self.node_id.clone(),
            name: self.name.clone(),
            description: None,
            kind: StepKind::Agent,
            agent_id: Some(self.agent_id.clone()),
            retry_policy: self.retry_count.map(|max_attempts| RetryPolicy {
                max_attempts,
                backoff_ms: self.backoff_ms.unwrap_or(0),
            }),
            condition: self.condition.clone(),
            timeout_ms: self.timeout_ms,
        }
    }
}

/// Dispatch policy for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    #[default]
    Sequential,
    Parallel,
    Priority,
}

impl std::str::FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "priority" => Ok(Self::Priority),
            other => Err(format!("unknown execution strategy: {}", other)),
        }
    }
}

/// Status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Cancelled,
}

/// Status of a node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// Why a node was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ConditionFalse,
    BlockedByFailedDependency,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ConditionFalse => write!(f, "condition evaluated to false"),
            SkipReason::BlockedByFailedDependency => write!(f, "blocked by failed dependency"),
        }
    }
}

/// Execution state of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub node_id: StepId,
    pub status: NodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retries_left: u32,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub skip_reason: Option<SkipReason>,
    pub output: Option<serde_json::Value>,
}

impl NodeExecution {
    pub fn pending(node_id: StepId, retries_left: u32) -> Self {
        Self {
            node_id,
            status: NodeStatus::Pending,
            started_at: None,
            completed_at: None,
            retries_left,
            attempts: 0,
            last_error: None,
            skip_reason: None,
            output: None,
        }
    }

    /// SUCCESS, SKIPPED, or FAILED with no retries left
    pub fn is_terminal(&self) -> bool {
        match self.status {
            NodeStatus::Success | NodeStatus::Skipped => true,
            NodeStatus::Failed => self.retries_left == 0,
            NodeStatus::Pending | NodeStatus::Running => false,
        }
    }
}

/// Run-level counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_nodes: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub success_rate: f64,
    pub duration_ms: u64,
}

/// A specific execution of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub strategy: ExecutionStrategy,
    pub status: ExecutionStatus,
    pub node_executions: HashMap<StepId, NodeExecution>,
    pub metrics: ExecutionMetrics,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn node(&self, node_id: &str) -> Option<&NodeExecution> {
        self.node_executions.get(&StepId::new(node_id))
    }

    /// Recompute counters from node states
    pub fn refresh_metrics(&mut self) {
        let total_nodes = self.node_executions.len();
        let count = |status: NodeStatus| {
            self.node_executions
                .values()
                .filter(|n| n.status == status)
                .count()
        };
        let success_count = count(NodeStatus::Success);
        let failed_count = count(NodeStatus::Failed);
        let skipped_count = count(NodeStatus::Skipped);

        let duration_ms = self
            .completed_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        self.metrics = ExecutionMetrics {
            total_nodes,
            success_count,
            failed_count,
            skipped_count,
            success_rate: if total_nodes == 0 {
                0.0
            } else {
                success_count as f64 / total_nodes as f64
            },
            duration_ms,
        };
    }
}
