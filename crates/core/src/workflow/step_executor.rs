use crate::agent::AgentExecutor;
use crate::config::EngineConfig;
use crate::error::NodeError;
use crate::events::{Event, EventLog, EventType};
use crate::types::{ExecutionId, NodeStatus, WorkflowExecution, WorkflowNode};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Runs one node to a terminal status with timeout and retry logic.
///
/// Attempts of a node run inside a single call, so two attempts of the same
/// node can never overlap. The node must already be marked running by the
/// scheduler.
pub struct NodeRunner {
    executor: Arc<dyn AgentExecutor>,
    event_log: Arc<dyn EventLog>,
    config: EngineConfig,
}

impl NodeRunner {
    pub fn new(
        executor: Arc<dyn AgentExecutor>,
        event_log: Arc<dyn EventLog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            executor,
            event_log,
            config,
        }
    }

    /// Execute a node, retrying while it has retries left
    pub async fn run(
        &self,
        execution_id: ExecutionId,
        node: &WorkflowNode,
        input: Value,
        state: &Mutex<WorkflowExecution>,
    ) -> NodeStatus {
        let timeout_ms = node.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let backoff_ms = node.backoff_ms.unwrap_or(self.config.default_backoff_ms);
        let mut attempt = 1;

        loop {
            {
                let mut execution = state.lock().await;
                if let Some(exec) = execution.node_executions.get_mut(&node.node_id) {
                    exec.status = NodeStatus::Running;
                    exec.attempts = attempt;
                }
            }

            tracing::info!(
                "Executing node {} via agent {} (attempt {}) for execution {}",
                node.node_id,
                node.agent_id,
                attempt,
                execution_id
            );
            self.emit(Event::new(
                execution_id,
                EventType::NodeStarted {
                    node_id: node.node_id.clone(),
                    attempt,
                },
            ))
            .await;

            let start = Instant::now();
            let result = self.attempt(node, input.clone(), timeout_ms).await;
            let duration = start.elapsed();

            match result {
                Ok(output) => {
                    {
                        let mut execution = state.lock().await;
                        if let Some(exec) = execution.node_executions.get_mut(&node.node_id) {
                            exec.status = NodeStatus::Success;
                            exec.output = Some(output);
                            exec.completed_at = Some(chrono::Utc::now());
                        }
                    }

                    self.emit(Event::new(
                        execution_id,
                        EventType::NodeSucceeded {
                            node_id: node.node_id.clone(),
                            duration_ms: duration.as_millis() as u64,
                        },
                    ))
                    .await;

                    return NodeStatus::Success;
                }
                Err(err) => {
                    let error_msg = err.to_string();
                    let will_retry = {
                        let mut execution = state.lock().await;
                        match execution.node_executions.get_mut(&node.node_id) {
                            Some(exec) => {
                                exec.retries_left = exec.retries_left.saturating_sub(1);
                                exec.status = NodeStatus::Failed;
                                exec.last_error = Some(error_msg.clone());
                                let will_retry = exec.retries_left > 0;
                                if !will_retry {
                                    exec.completed_at = Some(chrono::Utc::now());
                                }
                                will_retry
                            }
                            None => false,
                        }
                    };

                    self.emit(Event::new(
                        execution_id,
                        EventType::NodeFailed {
                            node_id: node.node_id.clone(),
                            error: error_msg.clone(),
                            attempt,
                            will_retry,
                        },
                    ))
                    .await;

                    if !will_retry {
                        tracing::warn!(
                            "Node {} failed after {} attempt(s): {}",
                            node.node_id,
                            attempt,
                            error_msg
                        );
                        return NodeStatus::Failed;
                    }

                    // Exponential backoff between attempts
                    let backoff = Duration::from_millis(
                        backoff_ms.saturating_mul(2_u64.saturating_pow(attempt - 1)),
                    );
                    tracing::info!(
                        "Retrying node {} after {:?} (attempt {}): {}",
                        node.node_id,
                        backoff,
                        attempt + 1,
                        error_msg
                    );
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }

                    attempt += 1;
                }
            }
        }
    }

    /// One executor call bounded by the node's timeout
    async fn attempt(
        &self,
        node: &WorkflowNode,
        input: Value,
        timeout_ms: u64,
    ) -> Result<Value, NodeError> {
        match timeout(
            Duration::from_millis(timeout_ms),
            self.executor.execute(&node.agent_id, input),
        )
        .await
        {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(NodeError::Executor(format!("{:#}", e))),
            Err(_) => {
                tracing::warn!("Node {} timed out after {}ms", node.node_id, timeout_ms);
                Err(NodeError::Timeout { timeout_ms })
            }
        }
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_log.append(event).await {
            tracing::warn!("Failed to append node event: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InMemoryEventLog;
    use crate::test_support::{Behavior, ScriptedExecutor};
    use crate::types::{ExecutionMetrics, ExecutionStatus, ExecutionStrategy, NodeExecution, WorkflowId};
    use std::collections::HashMap;

    fn state_for(node: &WorkflowNode, retries: u32) -> Mutex<WorkflowExecution> {
        let mut node_executions = HashMap::new();
        let mut exec = NodeExecution::pending(node.node_id.clone(), retries);
        exec.status = NodeStatus::Running;
        node_executions.insert(node.node_id.clone(), exec);

        Mutex::new(WorkflowExecution {
            execution_id: ExecutionId::new(),
            workflow_id: WorkflowId::new("wf"),
            strategy: ExecutionStrategy::Sequential,
            status: ExecutionStatus::Running,
            node_executions,
            metrics: ExecutionMetrics::default(),
            started_at: chrono::Utc::now(),
            completed_at: None,
        })
    }

    fn runner(executor: Arc<ScriptedExecutor>, log: Arc<InMemoryEventLog>) -> NodeRunner {
        NodeRunner::new(
            executor,
            log,
            EngineConfig {
                default_timeout_ms: 50,
                ..EngineConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let executor = Arc::new(ScriptedExecutor::new().with("flaky", Behavior::FailTimes(2)));
        let log = Arc::new(InMemoryEventLog::new());
        let node = WorkflowNode::new("a", "flaky");
        let state = state_for(&node, 3);

        let status = runner(executor.clone(), log.clone())
            .run(ExecutionId::new(), &node, serde_json::json!({}), &state)
            .await;

        assert_eq!(status, NodeStatus::Success);
        assert_eq!(executor.calls_for("flaky"), 3);

        let execution = state.lock().await;
        let exec = &execution.node_executions[&node.node_id];
        assert_eq!(exec.attempts, 3);
        assert_eq!(exec.retries_left, 1);
        assert!(exec.completed_at.is_some());
        assert!(exec.last_error.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_retries_record_last_error() {
        let executor = Arc::new(ScriptedExecutor::new().with("broken", Behavior::AlwaysFail));
        let log = Arc::new(InMemoryEventLog::new());
        let node = WorkflowNode::new("a", "broken");
        let state = state_for(&node, 2);
        let execution_id = ExecutionId::new();

        let status = runner(executor.clone(), log.clone())
            .run(execution_id, &node, serde_json::json!({}), &state)
            .await;

        assert_eq!(status, NodeStatus::Failed);
        assert_eq!(executor.calls_for("broken"), 2);

        let execution = state.lock().await;
        let exec = &execution.node_executions[&node.node_id];
        assert_eq!(exec.retries_left, 0);
        assert!(exec
            .last_error
            .as_deref()
            .unwrap()
            .contains("scripted failure"));

        let will_retry: Vec<bool> = log
            .get_execution_events(execution_id)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|e| match e.event_type {
                EventType::NodeFailed { will_retry, .. } => Some(will_retry),
                _ => None,
            })
            .collect();
        assert_eq!(will_retry, vec![true, false]);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let executor = Arc::new(ScriptedExecutor::new().with("slow", Behavior::Hang));
        let log = Arc::new(InMemoryEventLog::new());
        let node = WorkflowNode::new("a", "slow").with_timeout_ms(10);
        let state = state_for(&node, 1);
        let execution_id = ExecutionId::new();

        let status = runner(executor, log.clone())
            .run(execution_id, &node, serde_json::json!({}), &state)
            .await;

        assert_eq!(status, NodeStatus::Failed);
        let execution = state.lock().await;
        assert_eq!(
            execution.node_executions[&node.node_id].last_error.as_deref(),
            Some("Node timed out after 10ms")
        );

        let events = log.get_execution_events(execution_id).await.unwrap();
        assert!(events.iter().any(|e| matches!(
            e.event_type,
            EventType::NodeFailed { will_retry: false, .. }
        )));
    }
}
