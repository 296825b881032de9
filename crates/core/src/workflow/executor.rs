use super::dag::WorkflowDag;
use super::step_executor::NodeRunner;
use super::visualize;
use crate::agent::AgentExecutor;
use crate::config::EngineConfig;
use crate::context::InputContext;
use crate::error::EngineError;
use crate::events::{Event, EventLog, EventType, InMemoryEventLog};
use crate::types::{
    ExecutionId, ExecutionMetrics, ExecutionStatus, ExecutionStrategy, NodeExecution, NodeStatus,
    SkipReason, StepId, WorkflowDefinition, WorkflowExecution, WorkflowId, WorkflowNode,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A registered workflow: read-only after creation
struct RegisteredWorkflow {
    definition: WorkflowDefinition,
    nodes: HashMap<StepId, WorkflowNode>,
    /// Nodes in definition order
    order: Vec<StepId>,
    dag: WorkflowDag,
}

/// Per-run handles shared by the scheduling loop and node tasks
#[derive(Clone)]
struct RunContext {
    execution_id: ExecutionId,
    workflow: Arc<RegisteredWorkflow>,
    input: Arc<InputContext>,
    state: Arc<Mutex<WorkflowExecution>>,
    runner: Arc<NodeRunner>,
    event_log: Arc<dyn EventLog>,
}

enum Readiness {
    Waiting,
    Skip(SkipReason),
    Ready(Value),
}

/// In-memory DAG workflow engine.
///
/// Owns workflow definitions and live executions. Each run is driven by a
/// single scheduling loop dispatching ready nodes onto a worker pool: one
/// worker for the sequential strategy, `max_parallel_nodes` otherwise.
pub struct WorkflowEngine {
    config: EngineConfig,
    runner: Arc<NodeRunner>,
    event_log: Arc<dyn EventLog>,
    workflows: RwLock<HashMap<WorkflowId, Arc<RegisteredWorkflow>>>,
    executions: RwLock<HashMap<ExecutionId, Arc<Mutex<WorkflowExecution>>>>,
    // Replaced on cleanup so that later runs are unaffected
    shutdown: RwLock<CancellationToken>,
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig, executor: Arc<dyn AgentExecutor>) -> Self {
        Self::with_event_log(config, executor, Arc::new(InMemoryEventLog::new()))
    }

    pub fn with_event_log(
        config: EngineConfig,
        executor: Arc<dyn AgentExecutor>,
        event_log: Arc<dyn EventLog>,
    ) -> Self {
        let config = config.normalized();
        let runner = Arc::new(NodeRunner::new(
            executor,
            event_log.clone(),
            config.clone(),
        ));

        Self {
            config,
            runner,
            event_log,
            workflows: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
            shutdown: RwLock::new(CancellationToken::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn event_log(&self) -> Arc<dyn EventLog> {
        self.event_log.clone()
    }

    /// Register a workflow from runtime nodes.
    ///
    /// Returns false, storing nothing, when the graph has a cycle, a dangling
    /// dependency or duplicate node ids. Re-creating an existing id replaces
    /// the previous definition.
    pub async fn create_workflow(
        &self,
        workflow_id: impl Into<String>,
        nodes: Vec<WorkflowNode>,
        metadata: HashMap<String, Value>,
    ) -> bool {
        let workflow_id = WorkflowId::new(workflow_id);
        let definition = WorkflowDefinition {
            id: workflow_id.clone(),
            name: workflow_id.0.clone(),
            version: "1.0.0".to_string(),
            steps: nodes.iter().map(WorkflowNode::to_step).collect(),
            dependencies: nodes
                .iter()
                .filter(|n| !n.dependencies.is_empty())
                .map(|n| (n.node_id.clone(), n.dependencies.clone()))
                .collect(),
            metadata,
        };

        self.register(definition, nodes).await.is_ok()
    }

    /// Register a workflow from a definition; steps run with default priority
    pub async fn register_definition(&self, definition: &WorkflowDefinition) -> bool {
        self.try_register(definition).await.is_ok()
    }

    /// Like `register_definition`, but reports why a definition was rejected
    pub async fn try_register(&self, definition: &WorkflowDefinition) -> Result<(), EngineError> {
        let nodes = definition
            .steps
            .iter()
            .map(|step| WorkflowNode::from_step(step, definition.dependencies_of(&step.id)))
            .collect();

        self.register(definition.clone(), nodes).await
    }

    async fn register(
        &self,
        definition: WorkflowDefinition,
        nodes: Vec<WorkflowNode>,
    ) -> Result<(), EngineError> {
        let workflow_id = definition.id.clone();
        let dag = WorkflowDag::from_definition(&definition)
            .map_err(|e| reject(workflow_id.clone(), format!("{:#}", e)))?;

        let order = nodes.iter().map(|n| n.node_id.clone()).collect();
        let nodes = nodes.into_iter().map(|n| (n.node_id.clone(), n)).collect();
        let registered = Arc::new(RegisteredWorkflow {
            definition,
            nodes,
            order,
            dag,
        });

        let replaced = self
            .workflows
            .write()
            .await
            .insert(workflow_id.clone(), registered)
            .is_some();

        if replaced {
            tracing::info!("Replaced workflow definition: {}", workflow_id);
        } else {
            tracing::info!("Registered workflow: {}", workflow_id);
        }

        Ok(())
    }

    /// Execute a registered workflow to completion.
    ///
    /// Node failures never abort the run; the returned execution reports them
    /// through its metrics and per-node state.
    pub async fn execute_workflow(
        &self,
        workflow_id: &WorkflowId,
        input: InputContext,
        strategy: ExecutionStrategy,
    ) -> Result<WorkflowExecution, EngineError> {
        let workflow = self
            .workflows
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.clone()))?;
        let execution_id = ExecutionId::new();
        let node_executions = workflow
            .order
            .iter()
            .map(|id| {
                let retries = workflow.nodes[id]
                    .retry_count
                    .unwrap_or(self.config.default_retry_count);
                (id.clone(), NodeExecution::pending(id.clone(), retries))
            })
            .collect();

        let mut execution = WorkflowExecution {
            execution_id,
            workflow_id: workflow_id.clone(),
            strategy,
            status: ExecutionStatus::Running,
            node_executions,
            metrics: ExecutionMetrics::default(),
            started_at: chrono::Utc::now(),
            completed_at: None,
        };
        execution.refresh_metrics();
        let total_nodes = execution.metrics.total_nodes;

        let state = Arc::new(Mutex::new(execution));
        // Registered under the token it runs with, so cleanup sees both or neither
        let shutdown = {
            let shutdown = self.shutdown.read().await;
            self.executions
                .write()
                .await
                .insert(execution_id, state.clone());
            shutdown.clone()
        };

        tracing::info!(
            "Starting workflow execution: workflow_id={}, execution_id={}, strategy={:?}",
            workflow_id,
            execution_id,
            strategy
        );
        self.emit(Event::new(
            execution_id,
            EventType::RunStarted {
                workflow_id: workflow_id.clone(),
                total_nodes,
            },
        ))
        .await;

        let ctx = RunContext {
            execution_id,
            workflow,
            input: Arc::new(input),
            state: state.clone(),
            runner: self.runner.clone(),
            event_log: self.event_log.clone(),
        };

        let pool_size = match strategy {
            ExecutionStrategy::Sequential => 1,
            ExecutionStrategy::Parallel | ExecutionStrategy::Priority => {
                self.config.max_parallel_nodes
            }
        };

        // Dropping the scheduling future aborts every in-flight node task
        let finished = tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = schedule(&ctx, strategy, pool_size) => true,
        };

        let snapshot = {
            let mut execution = state.lock().await;
            execution.completed_at = Some(chrono::Utc::now());
            execution.status = if finished {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Cancelled
            };
            execution.refresh_metrics();
            execution.clone()
        };

        if finished {
            self.emit(Event::new(
                execution_id,
                EventType::RunCompleted {
                    success_rate: snapshot.metrics.success_rate,
                    duration_ms: snapshot.metrics.duration_ms,
                },
            ))
            .await;
            tracing::info!(
                "Workflow execution completed: execution_id={}, succeeded={}, failed={}, skipped={}",
                execution_id,
                snapshot.metrics.success_count,
                snapshot.metrics.failed_count,
                snapshot.metrics.skipped_count
            );
        } else {
            self.emit(Event::new(execution_id, EventType::RunCancelled))
                .await;
            tracing::warn!("Workflow execution abandoned: execution_id={}", execution_id);
        }

        Ok(snapshot)
    }

    /// Snapshot of a run, live or finished
    pub async fn get_execution_status(&self, execution_id: &ExecutionId) -> Option<WorkflowExecution> {
        let state = self.executions.read().await.get(execution_id).cloned()?;
        let mut snapshot = state.lock().await.clone();
        snapshot.refresh_metrics();
        Some(snapshot)
    }

    /// Flow diagram of a registered workflow
    pub async fn visualize_workflow(&self, workflow_id: &WorkflowId) -> Option<String> {
        let workflows = self.workflows.read().await;
        let workflow = workflows.get(workflow_id)?;
        Some(visualize::render(&workflow.definition))
    }

    pub async fn get_definition(&self, workflow_id: &WorkflowId) -> Option<WorkflowDefinition> {
        let workflows = self.workflows.read().await;
        workflows.get(workflow_id).map(|w| w.definition.clone())
    }

    /// Drop every definition and execution, abandoning runs in flight
    pub async fn cleanup(&self) {
        let mut shutdown = self.shutdown.write().await;
        shutdown.cancel();
        *shutdown = CancellationToken::new();

        let workflows = std::mem::take(&mut *self.workflows.write().await);
        let executions = std::mem::take(&mut *self.executions.write().await);
        if let Err(e) = self.event_log.clear().await {
            tracing::warn!("Failed to clear run events: {:#}", e);
        }
        drop(shutdown);

        tracing::info!(
            "Engine cleanup dropped {} workflow(s) and {} execution(s)",
            workflows.len(),
            executions.len()
        );
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_log.append(event).await {
            tracing::warn!("Failed to append run event: {:#}", e);
        }
    }
}

/// Scheduling loop for one run.
///
/// Readiness is computed and nodes are marked running under the run's lock, and
/// only this loop dispatches, so no node is started twice.
async fn schedule(ctx: &RunContext, strategy: ExecutionStrategy, pool_size: usize) {
    let order = dispatch_order(&ctx.workflow, strategy);
    let pool = Arc::new(Semaphore::new(pool_size));
    let mut in_flight: JoinSet<()> = JoinSet::new();
    let mut task_nodes: HashMap<tokio::task::Id, StepId> = HashMap::new();

    loop {
        let (skipped, dispatch) = {
            let mut execution = ctx.state.lock().await;
            let skipped = propagate_skips(ctx, &mut execution, &order);
            let dispatch = claim_ready(ctx, &mut execution, &order, &pool);
            (skipped, dispatch)
        };

        for (node_id, reason) in skipped {
            tracing::info!("Skipping node {}: {}", node_id, reason);
            emit(ctx, EventType::NodeSkipped { node_id, reason }).await;
        }

        for (node, input, permit) in dispatch {
            let task_ctx = ctx.clone();
            let node_id = node.node_id.clone();
            let handle = in_flight.spawn(async move {
                let _permit = permit;
                task_ctx
                    .runner
                    .run(task_ctx.execution_id, &node, input, &task_ctx.state)
                    .await;
            });
            task_nodes.insert(handle.id(), node_id);
        }

        match in_flight.join_next_with_id().await {
            Some(Ok((id, ()))) => {
                task_nodes.remove(&id);
            }
            Some(Err(join_err)) => {
                let node_id = task_nodes.remove(&join_err.id());
                tracing::error!("Node task for {:?} aborted: {}", node_id, join_err);
                if let Some(node_id) = node_id {
                    let mut execution = ctx.state.lock().await;
                    if let Some(exec) = execution.node_executions.get_mut(&node_id) {
                        exec.status = NodeStatus::Failed;
                        exec.retries_left = 0;
                        exec.last_error = Some(format!("node task aborted: {}", join_err));
                        exec.completed_at = Some(chrono::Utc::now());
                    }
                }
            }
            // Nothing running and nothing claimable: every node is terminal
            None => break,
        }
    }
}

fn reject(workflow_id: WorkflowId, reason: String) -> EngineError {
    tracing::warn!("Rejected workflow {}: {}", workflow_id, reason);
    EngineError::InvalidWorkflow {
        workflow_id,
        reason,
    }
}

/// Order in which ready nodes are considered for dispatch
fn dispatch_order(workflow: &RegisteredWorkflow, strategy: ExecutionStrategy) -> Vec<StepId> {
    match strategy {
        ExecutionStrategy::Sequential => workflow.dag.topological_order(),
        ExecutionStrategy::Parallel => workflow.order.clone(),
        ExecutionStrategy::Priority => {
            let mut order = workflow.order.clone();
            order.sort_by(|a, b| {
                let pa = workflow.nodes[a].priority;
                let pb = workflow.nodes[b].priority;
                pb.cmp(&pa).then_with(|| a.cmp(b))
            });
            order
        }
    }
}

/// Mark pending nodes skipped until no further skips follow
fn propagate_skips(
    ctx: &RunContext,
    execution: &mut WorkflowExecution,
    order: &[StepId],
) -> Vec<(StepId, SkipReason)> {
    let mut skipped = Vec::new();

    loop {
        let mut changed = false;
        for node_id in order {
            if !is_pending(execution, node_id) {
                continue;
            }
            if let Readiness::Skip(reason) = readiness(ctx, execution, node_id) {
                if let Some(exec) = execution.node_executions.get_mut(node_id) {
                    exec.status = NodeStatus::Skipped;
                    exec.skip_reason = Some(reason);
                    exec.completed_at = Some(chrono::Utc::now());
                }
                skipped.push((node_id.clone(), reason));
                changed = true;
            }
        }
        if !changed {
            return skipped;
        }
    }
}

/// Mark as many ready nodes running as the pool has free workers
fn claim_ready(
    ctx: &RunContext,
    execution: &mut WorkflowExecution,
    order: &[StepId],
    pool: &Arc<Semaphore>,
) -> Vec<(WorkflowNode, Value, OwnedSemaphorePermit)> {
    let mut claimed = Vec::new();

    for node_id in order {
        if !is_pending(execution, node_id) {
            continue;
        }
        let Readiness::Ready(input) = readiness(ctx, execution, node_id) else {
            continue;
        };
        let Ok(permit) = pool.clone().try_acquire_owned() else {
            break;
        };

        if let Some(exec) = execution.node_executions.get_mut(node_id) {
            exec.status = NodeStatus::Running;
            exec.started_at = Some(chrono::Utc::now());
        }
        tracing::debug!("Dispatching node {}", node_id);
        claimed.push((ctx.workflow.nodes[node_id].clone(), input, permit));
    }

    claimed
}

fn is_pending(execution: &WorkflowExecution, node_id: &StepId) -> bool {
    execution
        .node_executions
        .get(node_id)
        .is_some_and(|n| n.status == NodeStatus::Pending)
}

fn readiness(ctx: &RunContext, execution: &WorkflowExecution, node_id: &StepId) -> Readiness {
    let node = &ctx.workflow.nodes[node_id];
    let mut blocked = false;

    for dep in &node.dependencies {
        match execution.node_executions.get(dep) {
            Some(exec) if exec.is_terminal() => {
                // Blocked skips carry the failure downstream; condition skips do not
                if exec.status == NodeStatus::Failed
                    || exec.skip_reason == Some(SkipReason::BlockedByFailedDependency)
                {
                    blocked = true;
                }
            }
            _ => return Readiness::Waiting,
        }
    }

    if blocked {
        return Readiness::Skip(SkipReason::BlockedByFailedDependency);
    }

    if let Some(condition) = &node.condition {
        if !ctx.input.flag(condition) {
            return Readiness::Skip(SkipReason::ConditionFalse);
        }
    }

    let outputs = node.dependencies.iter().filter_map(|dep| {
        let exec = execution.node_executions.get(dep)?;
        match (&exec.status, &exec.output) {
            (NodeStatus::Success, Some(output)) => Some((dep, output)),
            _ => None,
        }
    });

    Readiness::Ready(ctx.input.merged_with(outputs))
}

async fn emit(ctx: &RunContext, event_type: EventType) {
    if let Err(e) = ctx
        .event_log
        .append(Event::new(ctx.execution_id, event_type))
        .await
    {
        tracing::warn!("Failed to append run event: {:#}", e);
    }
}
